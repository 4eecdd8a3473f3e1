use std::time::{Duration, Instant};

use serlink_rpc::{Endpoint, RpcError};
use serlink_transport::{ByteTransport, MemoryPort};
use tracing::info;

use crate::cmd::{parse_duration, DemoArgs};
use crate::exit::{rpc_error, transport_error, CliResult, FAILURE, SUCCESS};
use crate::functions::register_builtins;
use crate::output::{print_calls, print_stats, CallRecord, OutputFormat, Outcome};

/// Calls each side makes, with the outcome a healthy link produces.
const SCRIPT: [(&str, [u8; 2], Outcome); 3] = [
    ("sum", [3, 4], Outcome::Ok),
    ("multiply", [5, 6], Outcome::Ok),
    ("unknown", [1, 2], Outcome::RemoteError),
];

pub fn run(args: DemoArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;

    let (left_port, right_port) = MemoryPort::pair();
    let left_noise = left_port
        .try_clone()
        .map_err(|err| transport_error("memory link", err))?;
    let right_noise = right_port
        .try_clone()
        .map_err(|err| transport_error("memory link", err))?;

    let left = Endpoint::open(left_port).map_err(|err| rpc_error("left endpoint", err))?;
    let right = Endpoint::open(right_port).map_err(|err| rpc_error("right endpoint", err))?;
    register_builtins(left.engine());
    register_builtins(right.engine());

    if args.noise > 0 {
        let junk = junk_bytes(args.noise);
        left_noise.inject(&junk);
        right_noise.inject(&junk);
        info!(bytes = args.noise, "injected line noise");
    }

    let mut records = Vec::with_capacity(SCRIPT.len() * 2);
    for (side, endpoint) in [("left", &left), ("right", &right)] {
        for (name, call_args, _) in &SCRIPT {
            records.push(timed_call(side, endpoint, name, call_args, timeout));
        }
    }

    let left_stats = left.shutdown();
    let right_stats = right.shutdown();

    print_calls(&records, format);
    print_stats("left", &left_stats, format);
    print_stats("right", &right_stats, format);

    let expected = SCRIPT.iter().map(|(_, _, outcome)| *outcome).cycle();
    if records.iter().zip(expected).all(|(record, outcome)| record.outcome == outcome) {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

fn timed_call(
    side: &str,
    endpoint: &Endpoint<MemoryPort>,
    name: &str,
    args: &[u8],
    timeout: Duration,
) -> CallRecord {
    let started = Instant::now();
    let result: Result<_, RpcError> = endpoint.call(name, args, timeout);
    CallRecord::new(side, name, args, result.as_deref(), started.elapsed())
}

/// Deterministic junk that never contains a start marker.
fn junk_bytes(len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| match (i * 37 % 251) as u8 {
            serlink_frame::START => 0x00,
            b => b,
        })
        .collect()
}
