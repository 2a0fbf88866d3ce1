/// Serial line settings. Peripherals on this board all run 9600 8N1.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
}

impl SerialSettings {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: 9600,
        }
    }

    pub fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

#[derive(Clone, Debug)]
pub struct PortInfo {
    pub name: String,
    pub driver: String,
}
