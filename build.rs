use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);

    if env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path().map_err(|e| e.to_string())?;
        env::set_var("PROTOC", protoc);
    }

    // Client stubs are used by the integration tests
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .file_descriptor_set_path(out_dir.join("loadbalancer_descriptor.bin"))
        .compile_protos(&["proto/backend.proto"], &["proto"])?;

    println!("cargo:rerun-if-changed=proto/backend.proto");

    Ok(())
}
