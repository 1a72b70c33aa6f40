//! SysTick: a minimal ARMv6-M system timer.
//!
//! Register map (offsets from the device's base address):
//!
//! | Offset | Register | Notes |
//! |---|---|---|
//! | 0  | CSR  | ENABLE=bit0, TICKINT=bit1, CLKSOURCE=bit2, COUNTFLAG=bit16 |
//! | 4  | RVR  | Reload value |
//! | 8  | CVR  | Current value |
//! | 12 | CALIB | Always reads zero |

use super::Device;

const CSR: u32 = 0;
const RVR: u32 = 4;
const CVR: u32 = 8;
const CALIB: u32 = 12;

const CSR_ENABLE: u32 = 1 << 0;
const CSR_TICKINT: u32 = 1 << 1;
#[allow(dead_code)]
const CSR_CLKSOURCE: u32 = 1 << 2;
const CSR_COUNTFLAG: u32 = 1 << 16;

#[derive(Debug)]
pub struct SysTick {
    irq_number: u32,
    pending_irq: bool,
    csr: u32,
    reload: u32,
    current: u32,
}

impl SysTick {
    pub fn new(irq_number: u32) -> Self {
        let mut dev = SysTick {
            irq_number,
            pending_irq: false,
            csr: 0,
            reload: 0,
            current: 0,
        };
        dev.reset();
        dev
    }
}

impl Device for SysTick {
    fn load(&mut self, offset: u32, _width: u8) -> u32 {
        match offset {
            CSR => {
                let data = self.csr;
                self.csr &= !CSR_COUNTFLAG;
                data
            }
            RVR => self.reload,
            CVR => self.current,
            CALIB => 0,
            _ => 0,
        }
    }

    fn store(&mut self, offset: u32, data: u32, _width: u8) {
        match offset {
            CSR => self.csr = data,
            RVR => self.reload = data,
            CVR => self.current = data,
            CALIB => {}
            _ => {}
        }
    }

    fn clock(&mut self) -> Option<u32> {
        if self.csr & CSR_ENABLE != 0 {
            if self.current == 0 {
                self.current = self.reload;
                self.csr |= CSR_COUNTFLAG;
                if self.csr & CSR_TICKINT != 0 {
                    self.pending_irq = true;
                }
            } else {
                self.current -= 1;
            }
        }

        let fired = self.pending_irq;
        self.pending_irq = false;
        fired.then_some(self.irq_number)
    }

    fn reset(&mut self) {
        self.pending_irq = false;
        self.csr = 0;
        self.reload = 0;
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn countflag_clears_on_read() {
        let mut t = SysTick::new(15);
        t.store(RVR, 1, 4);
        t.store(CSR, CSR_ENABLE, 4);
        assert_eq!(t.clock(), None); // loads reload into current (1 -> decremented next tick)
        assert_eq!(t.clock(), None);
        let csr = t.load(CSR, 4);
        assert_eq!(csr & CSR_COUNTFLAG, CSR_COUNTFLAG);
        assert_eq!(t.load(CSR, 4) & CSR_COUNTFLAG, 0);
    }

    #[test]
    fn tickint_asserts_irq_once() {
        let mut t = SysTick::new(15);
        t.store(RVR, 0, 4);
        t.store(CSR, CSR_ENABLE | CSR_TICKINT, 4);
        // current starts at 0 -> first clock reloads immediately and fires
        assert_eq!(t.clock(), Some(15));
        assert_eq!(t.clock(), Some(15));
    }

    #[test]
    fn calibration_reads_zero() {
        let mut t = SysTick::new(15);
        assert_eq!(t.load(CALIB, 4), 0);
    }
}
