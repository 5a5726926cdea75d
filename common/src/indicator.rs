/// Single status LED.
///
/// One blink marks a completed boot. Continuous blinking marks a node that
/// could not associate and is waiting for someone to look at it.
pub trait StatusIndicator {
    fn blink_once(&mut self);

    fn blink_forever(&mut self) -> !;
}
