/// Route runtime logs through the test harness' captured output
pub fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
