//! Built-in functions served by `serve` and `demo`.
//!
//! Each takes the first two argument bytes and ignores the rest. Arithmetic
//! wraps. Fewer than two arguments yield `[0]`.

use serlink_rpc::RpcEngine;
use serlink_transport::ByteTransport;

pub fn sum(args: &[u8]) -> Vec<u8> {
    match args {
        [a, b, ..] => vec![a.wrapping_add(*b)],
        _ => vec![0],
    }
}

pub fn multiply(args: &[u8]) -> Vec<u8> {
    match args {
        [a, b, ..] => vec![a.wrapping_mul(*b)],
        _ => vec![0],
    }
}

pub fn register_builtins<T: ByteTransport + 'static>(engine: &RpcEngine<T>) {
    engine.register("sum", sum);
    engine.register("multiply", multiply);
}
