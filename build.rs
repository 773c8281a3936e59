fn main() {
    let target_os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = std::env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();

    // glibc shipped the POSIX AIO symbols in librt until 2.34; linking it is
    // harmless on newer systems where librt is an empty stub.
    if target_os == "linux" && target_env == "gnu" {
        println!("cargo:rustc-link-lib=rt");
    }
}
