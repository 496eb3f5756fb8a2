// Build script for otactl - embeds version at compile time

fn main() {
    // Release builds may override the version string
    let version =
        std::env::var("OTACTL_VERSION").unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string());

    println!("cargo:rustc-env=OTACTL_VERSION={}", version);
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-env-changed=OTACTL_VERSION");
}
