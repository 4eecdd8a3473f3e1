use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, ServeArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::functions::register_builtins;
use crate::output::{print_stats, OutputFormat};

const IDLE_TICK: Duration = Duration::from_millis(50);

#[cfg(unix)]
pub fn run(args: ServeArgs, format: OutputFormat) -> CliResult<i32> {
    use serlink_rpc::Endpoint;
    use serlink_transport::{SerialConfig, SerialPort};

    let deadline = args
        .duration
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .map(|duration| Instant::now() + duration);

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let port = SerialPort::new(
        &args.device,
        SerialConfig {
            baud_rate: args.baud,
            ..SerialConfig::default()
        },
    );
    let endpoint = Endpoint::open(port).map_err(|err| {
        rpc_error(&format!("failed to open {}", args.device.display()), err)
    })?;
    register_builtins(endpoint.engine());
    info!(device = %args.device.display(), baud = args.baud, "serving sum, multiply");

    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            break;
        }
        thread::sleep(IDLE_TICK);
    }

    let stats = endpoint.shutdown();
    print_stats(&args.device.display().to_string(), &stats, format);
    Ok(SUCCESS)
}

#[cfg(not(unix))]
pub fn run(_args: ServeArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "serial devices are only supported on unix",
    ))
}
