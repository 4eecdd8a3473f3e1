use std::time::Instant;

use crate::cmd::{parse_duration, CallArgs};
use crate::exit::{rpc_error, CliResult, SUCCESS};
use crate::output::{print_calls, CallRecord, OutputFormat};

#[cfg(unix)]
pub fn run(args: CallArgs, format: OutputFormat) -> CliResult<i32> {
    use serlink_rpc::Endpoint;
    use serlink_transport::{SerialConfig, SerialPort};

    let timeout = parse_duration(&args.timeout)?;
    let port = SerialPort::new(
        &args.device,
        SerialConfig {
            baud_rate: args.baud,
            write_timeout: timeout,
        },
    );
    let endpoint = Endpoint::open(port).map_err(|err| {
        rpc_error(&format!("failed to open {}", args.device.display()), err)
    })?;

    let started = Instant::now();
    let result = endpoint.call(&args.name, &args.args, timeout);
    let record = CallRecord::new(
        &args.device.display().to_string(),
        &args.name,
        &args.args,
        result.as_deref(),
        started.elapsed(),
    );
    endpoint.shutdown();

    print_calls(std::slice::from_ref(&record), format);
    match result {
        Ok(_) => Ok(SUCCESS),
        Err(err) => Err(rpc_error(&format!("call {} failed", args.name), err)),
    }
}

#[cfg(not(unix))]
pub fn run(_args: CallArgs, _format: OutputFormat) -> CliResult<i32> {
    Err(crate::exit::CliError::new(
        crate::exit::USAGE,
        "serial devices are only supported on unix",
    ))
}
