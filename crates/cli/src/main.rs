use clap::Parser;
use framecast::{Server, ServerConfig};
use std::io;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "framecast-server",
    about = "Standalone RTSP server publishing in-process camera frames"
)]
struct Args {
    /// RTSP listen port
    #[arg(long, short, default_value_t = framecast::DEFAULT_PORT)]
    port: u16,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    // Control plane only: no encoder is wired here, so SETUP answers 500
    // until an embedding installs a codec via ServerConfig. Useful for
    // poking at the RTSP state machine with a real client.
    let server = Server::with_config(ServerConfig {
        port: args.port,
        ..ServerConfig::default()
    });

    if let Err(e) = server.start() {
        eprintln!("failed to start server: {e}");
        return ExitCode::from(1);
    }

    println!("RTSP server on port {} — press Enter to stop", args.port);
    let mut input = String::new();
    let _ = io::stdin().read_line(&mut input);

    server.stop();
    ExitCode::SUCCESS
}
