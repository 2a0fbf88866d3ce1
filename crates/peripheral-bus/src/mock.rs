use crate::{BusError, EchoPin};
use embedded_hal::i2c::{ErrorType, Operation, SevenBitAddress};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// One recorded bus transfer.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum I2cTransaction {
    Write { addr: u8, reg: u8, data: Vec<u8> },
    Read { addr: u8, reg: u8, len: usize },
}

#[derive(Default)]
struct Device {
    registers: Vec<u8>,
    pointer: u8,
    /// Values returned by successive reads of a register before falling back to the register file.
    queued: HashMap<u8, VecDeque<u8>>,
}

impl Device {
    fn new() -> Self {
        Self {
            registers: vec![0; 256],
            ..Default::default()
        }
    }

    fn read_next(&mut self) -> u8 {
        let reg = self.pointer;
        self.pointer = self.pointer.wrapping_add(1);
        if let Some(v) = self.queued.get_mut(&reg).and_then(|q| q.pop_front()) {
            return v;
        }
        self.registers[reg as usize]
    }
}

#[derive(Default)]
struct MockState {
    devices: HashMap<u8, Device>,
    log: Vec<I2cTransaction>,
    fault: Option<BusError>,
}

/// In-process register-file I2C bus.
///
/// Every attached device exposes 256 byte-wide registers with an auto-incrementing
/// pointer, which is how the LTR390 and BMP280 behave. Clones share the same bus so a
/// test can keep a handle while a driver owns another.
#[derive(Clone, Default)]
pub struct MockI2c {
    state: Arc<Mutex<MockState>>,
}

impl MockI2c {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a device at `addr`. Transfers to unattached addresses are NACKed.
    pub fn attach(&self, addr: u8) -> &Self {
        self.lock().devices.entry(addr).or_insert_with(Device::new);
        self
    }

    pub fn set_register(&self, addr: u8, reg: u8, value: u8) {
        self.set_registers(addr, reg, &[value]);
    }

    pub fn set_registers(&self, addr: u8, start: u8, values: &[u8]) {
        let mut state = self.lock();
        let dev = state.devices.entry(addr).or_insert_with(Device::new);
        for (i, v) in values.iter().enumerate() {
            let reg = start.wrapping_add(i as u8);
            dev.registers[reg as usize] = *v;
        }
    }

    pub fn register(&self, addr: u8, reg: u8) -> Option<u8> {
        self.lock()
            .devices
            .get(&addr)
            .map(|d| d.registers[reg as usize])
    }

    /// Queue values that successive reads of `reg` return before the stored value.
    pub fn queue_reads(&self, addr: u8, reg: u8, values: &[u8]) {
        let mut state = self.lock();
        let dev = state.devices.entry(addr).or_insert_with(Device::new);
        dev.queued.entry(reg).or_default().extend(values.iter().copied());
    }

    /// Make every following transfer fail with `fault` until cleared.
    pub fn set_fault(&self, fault: Option<BusError>) {
        self.lock().fault = fault;
    }

    pub fn transactions(&self) -> Vec<I2cTransaction> {
        self.lock().log.clone()
    }

    pub fn clear_transactions(&self) {
        self.lock().log.clear();
    }

    /// Register writes issued to `addr`, in order.
    pub fn writes_to(&self, addr: u8) -> Vec<(u8, Vec<u8>)> {
        self.lock()
            .log
            .iter()
            .filter_map(|t| match t {
                I2cTransaction::Write { addr: a, reg, data } if *a == addr => {
                    Some((*reg, data.clone()))
                }
                _ => None,
            })
            .collect()
    }

    fn transfer(&self, address: u8, operations: &mut [Operation<'_>]) -> Result<(), BusError> {
        let mut state = self.lock();
        if let Some(fault) = state.fault.clone() {
            return Err(fault);
        }
        let MockState { devices, log, .. } = &mut *state;
        let dev = devices.get_mut(&address).ok_or(BusError::Nack(address))?;
        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    let Some((reg, data)) = bytes.split_first() else {
                        continue;
                    };
                    dev.pointer = *reg;
                    for b in data {
                        let r = dev.pointer;
                        dev.registers[r as usize] = *b;
                        dev.pointer = r.wrapping_add(1);
                    }
                    // A bare register byte only moves the pointer.
                    if !data.is_empty() {
                        log.push(I2cTransaction::Write {
                            addr: address,
                            reg: *reg,
                            data: data.to_vec(),
                        });
                    }
                }
                Operation::Read(buf) => {
                    log.push(I2cTransaction::Read {
                        addr: address,
                        reg: dev.pointer,
                        len: buf.len(),
                    });
                    for b in buf.iter_mut() {
                        *b = dev.read_next();
                    }
                }
            }
        }
        Ok(())
    }
}

impl ErrorType for MockI2c {
    type Error = BusError;
}

impl embedded_hal_async::i2c::I2c<SevenBitAddress> for MockI2c {
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.transfer(address, operations)
    }
}

/// Echo pin that answers a trigger after a fixed delay with a fixed-width pulse.
#[derive(Clone, Debug)]
pub struct MockEchoPin {
    echo: Option<(Duration, Duration)>,
    triggered_at: Option<Instant>,
    trigger_high: bool,
}

impl MockEchoPin {
    pub fn new(rise_after: Duration, width: Duration) -> Self {
        Self {
            echo: Some((rise_after, width)),
            triggered_at: None,
            trigger_high: false,
        }
    }

    /// A module that never answers, as when nothing is in range.
    pub fn silent() -> Self {
        Self {
            echo: None,
            triggered_at: None,
            trigger_high: false,
        }
    }
}

impl EchoPin for MockEchoPin {
    fn set_trigger(&mut self, high: bool) {
        // Falling edge of the trigger pulse starts the burst.
        if self.trigger_high && !high {
            self.triggered_at = Some(Instant::now());
        }
        self.trigger_high = high;
    }

    fn echo_high(&self) -> bool {
        match (self.echo, self.triggered_at) {
            (Some((rise_after, width)), Some(t0)) => {
                let elapsed = t0.elapsed();
                elapsed >= rise_after && elapsed < rise_after + width
            }
            _ => false,
        }
    }
}
