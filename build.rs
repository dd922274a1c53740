fn main() {
    // macOS: CoreBluetooth refuses to scan unless the binary carries an
    // Info.plist with NSBluetoothAlwaysUsageDescription. A CLI has no bundle,
    // so the plist is linked into the __TEXT,__info_plist section instead.
    //
    // CARGO_CFG_TARGET_OS is the target, so cross builds pick this up too.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("macos") {
        return;
    }

    let Ok(dir) = std::env::var("CARGO_MANIFEST_DIR") else {
        return;
    };
    let plist = format!("{dir}/Info.plist");

    for arg in ["-sectcreate", "__TEXT", "__info_plist", plist.as_str()] {
        println!("cargo:rustc-link-arg={arg}");
    }
    println!("cargo:rerun-if-changed=Info.plist");
}
