/// Trigger/echo GPIO pair of a pulse-echo ranging module.
///
/// Implementations must not block: the ranging routine polls `echo_high`
/// cooperatively and yields between polls.
pub trait EchoPin {
    /// Drive the trigger line.
    fn set_trigger(&mut self, high: bool);

    /// Sample the echo line.
    fn echo_high(&self) -> bool;
}
