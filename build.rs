fn main() {
    // The message types are hand-written prost structs in src/protocol.rs, so
    // only the service stubs are generated here and no protoc is required.
    let conn = tonic_build::manual::Method::builder()
        .name("conn")
        .route_name("Conn")
        .input_type("crate::protocol::Request")
        .output_type("crate::protocol::Response")
        .codec_path("tonic::codec::ProstCodec")
        .client_streaming()
        .server_streaming()
        .build();

    let service = tonic_build::manual::Service::builder()
        .name("Sql")
        .package("litesql.grpc.v1")
        .method(conn)
        .build();

    tonic_build::manual::Builder::new().compile(&[service]);

    println!("cargo:rerun-if-changed=build.rs");
}
