// ABOUTME: Build script generating the im.v1 message types and client.
// ABOUTME: Uses tonic-build; only the client side is compiled.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .compile_protos(&["proto-src/im/v1/message.proto"], &["proto-src"])?;

    println!("cargo:rerun-if-changed=proto-src/im/v1/message.proto");

    Ok(())
}
