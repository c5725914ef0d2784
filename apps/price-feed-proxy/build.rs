//! Build Script for Price Feed Proxy
//!
//! Generates Rust protobuf stubs from workspace proto definitions.
//!
//! Needs `protoc` in PATH, or its location in `PROTOC`.
#![allow(clippy::expect_used)]

use std::{env, path::PathBuf};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Emit cfg for coverage detection
    if env::var("CARGO_LLVM_COV").is_ok()
        || env::var("LLVM_PROFILE_FILE").is_ok()
        || env::var("RUSTFLAGS")
            .map(|f| f.contains("instrument-coverage"))
            .unwrap_or(false)
    {
        println!("cargo:rustc-cfg=coverage");
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let proto_root = manifest_dir.join("../../packages/proto");
    let proto = proto_root.join("pricefeed/v1/pricefeed.proto");
    println!("cargo:rerun-if-changed={}", proto.display());

    tonic_prost_build::configure()
        .build_client(true) // Client for integration tests
        .build_server(true)
        .compile_protos(&[proto], &[proto_root])
        .expect("Failed to compile protobuf definitions");
}
