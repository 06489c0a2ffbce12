use automato_frame::protocol::{FIRST_MODULE_UID, FORMAT_STORAGE, MAX_UID};

use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("automato {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: automato");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", option_env!("AUTOMATO_BUILD_TARGET").unwrap_or("unknown"));
    println!("profile: {}", option_env!("AUTOMATO_BUILD_PROFILE").unwrap_or("unknown"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!("module_uids: {FIRST_MODULE_UID}..={MAX_UID}");
    println!("highest_opcode: {FORMAT_STORAGE}");
    println!(
        "features: coordinator={}, module={}, cli=true",
        cfg!(feature = "coordinator"),
        cfg!(feature = "module"),
    );

    Ok(SUCCESS)
}
