use alarmdealer2mqtt_lib::{logging, run};

fn main() {
    if let Err(e) = logging::init_logger() {
        eprintln!("Failed to initialize logger: {}", e);
    }
    run();
}
