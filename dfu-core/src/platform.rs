/// Control-transfer and reset primitives of the MCU.
pub trait Platform {
    /// Resets peripherals, disables and un-pends every interrupt line and
    /// stops the system tick.
    fn quiesce(&mut self);

    /// Points the vector table at `vector_table` and enters the image's
    /// reset handler.
    fn transfer_control(&mut self, vector_table: u32) -> !;

    fn system_reset(&mut self) -> !;
}
