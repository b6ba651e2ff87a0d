const AUTH_PROTO: &str = "../../proto/linkd_auth.proto";
const PROTO_ROOT: &str = "../../proto/";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Use the bundled protoc unless the environment already names one.
    if std::env::var_os("PROTOC").is_none() {
        let protoc = protoc_bin_vendored::protoc_bin_path()?;
        // SAFETY: build scripts are single-threaded at this point.
        unsafe { std::env::set_var("PROTOC", protoc) };
    }

    tonic_prost_build::configure()
        .build_client(true)
        .build_server(true)
        .compile_protos(&[AUTH_PROTO], &[PROTO_ROOT])?;

    println!("cargo:rerun-if-changed={AUTH_PROTO}");
    Ok(())
}
