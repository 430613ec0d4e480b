fn main() -> Result<(), Box<dyn std::error::Error>> {
    uptime_lib::run()
}
