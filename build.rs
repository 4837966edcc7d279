fn main() {
    // libtorch location, either from the LIBTORCH env var or a local checkout
    let libtorch_path = std::env::var("LIBTORCH")
        .unwrap_or_else(|_| "libtorch".to_string());

    println!("cargo:rustc-link-search=native={}/lib", libtorch_path);
    println!("cargo:rustc-link-lib=dylib=torch");
    println!("cargo:rustc-link-lib=dylib=c10");

    println!("cargo:include={}/include", libtorch_path);
    println!("cargo:include={}/include/torch/csrc/api/include", libtorch_path);
}
