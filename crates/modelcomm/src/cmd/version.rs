use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("modelcomm {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: modelcomm");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!("target: {}", env!("MODELCOMM_BUILD_TARGET"));
    println!("profile: {}", env!("MODELCOMM_BUILD_PROFILE"));
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("git_hash: {}", env!("MODELCOMM_GIT_HASH"));
    println!("backends: {}", env!("MODELCOMM_BACKENDS"));
    println!("features: async={}, cli=true", cfg!(feature = "async"));

    Ok(SUCCESS)
}
