use std::env;

/// Passed through from the build environment when set, e.g. by CI.
const GIT_HASH_ENV: &str = "MODELCOMM_GIT_HASH";

fn main() {
    if let Ok(target) = env::var("TARGET") {
        println!("cargo:rustc-env=MODELCOMM_BUILD_TARGET={target}");
    }
    if let Ok(profile) = env::var("PROFILE") {
        println!("cargo:rustc-env=MODELCOMM_BUILD_PROFILE={profile}");
    }

    // System V queues are only compiled into the transport on Linux.
    let backends = match env::var("CARGO_CFG_TARGET_OS").as_deref() {
        Ok("linux") => "memory,sysv",
        _ => "memory",
    };
    println!("cargo:rustc-env=MODELCOMM_BACKENDS={backends}");

    match env::var(GIT_HASH_ENV) {
        Ok(hash) if !hash.trim().is_empty() => {
            println!("cargo:rustc-env={GIT_HASH_ENV}={}", hash.trim());
        }
        _ => println!("cargo:rustc-env={GIT_HASH_ENV}=unknown"),
    }

    println!("cargo:rerun-if-env-changed=TARGET");
    println!("cargo:rerun-if-env-changed=PROFILE");
    println!("cargo:rerun-if-env-changed={GIT_HASH_ENV}");
}
