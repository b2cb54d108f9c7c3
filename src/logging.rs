/// Initializes the logger with the `env_logger` crate.
///
/// Hosts embedding the pipeline usually install their own logger; call this
/// from binaries and examples that have none.
pub fn init_logger() {
    env_logger::init();
}
