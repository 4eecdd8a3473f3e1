use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("serlink {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: serlink");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "build_target: {}",
        option_env!("SERLINK_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!(
        "features: rpc={}, async={}, cli=true",
        cfg!(feature = "rpc"),
        cfg!(feature = "async")
    );
    println!("serial: {}", if cfg!(unix) { "termios" } else { "unavailable" });
    println!(
        "frame: start=0x{:02X} sep=0x{:02X} end=0x{:02X} crc=crc8/0x{:02X} max_payload={}",
        serlink_frame::START,
        serlink_frame::SEP,
        serlink_frame::END,
        serlink_frame::crc::CRC8_POLY,
        serlink_frame::MAX_PAYLOAD
    );

    Ok(SUCCESS)
}
