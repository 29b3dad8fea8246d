use std::env;
use std::path::PathBuf;

fn main() {
    // Only run bindgen and linking logic if the `dcam-sdk` feature is enabled.
    // Without it the crate compiles to an empty binding module.
    #[cfg(feature = "dcam-sdk")]
    {
        println!("cargo:rerun-if-env-changed=DCAM_SDK_DIR");
        println!("cargo:rerun-if-env-changed=DCAM_LIB_DIR");
        println!("cargo:rerun-if-changed=wrapper.h");

        let sdk_dir = env::var("DCAM_SDK_DIR").expect(
            "DCAM_SDK_DIR environment variable must be set when `dcam-sdk` feature is enabled.",
        );

        let sdk_include_path = PathBuf::from(&sdk_dir).join("inc");

        let sdk_lib_path = if let Ok(lib_dir) = env::var("DCAM_LIB_DIR") {
            PathBuf::from(lib_dir)
        } else {
            PathBuf::from(&sdk_dir).join("lib")
        };

        if !sdk_include_path.exists() {
            panic!(
                "DCAM SDK include path does not exist: {:?}",
                sdk_include_path
            );
        }
        // Libraries may be installed system-wide, so a missing lib dir only warns.
        if !sdk_lib_path.exists() {
            eprintln!(
                "Warning: DCAM SDK lib path does not exist: {:?}",
                sdk_lib_path
            );
        }

        let bindings = bindgen::Builder::default()
            .header("wrapper.h")
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .clang_arg(format!("-I{}", sdk_include_path.display()))
            .allowlist_function("dcamapi_.*")
            .allowlist_function("dcamdev_.*")
            .allowlist_function("dcamprop_.*")
            .allowlist_function("dcambuf_.*")
            .allowlist_function("dcamcap_.*")
            .allowlist_function("dcamwait_.*")
            .allowlist_type("DCAM.*")
            .allowlist_type("HDCAM.*")
            .allowlist_type("int32|_ui32")
            .allowlist_var("DCAM.*")
            // Vendor enums carry values above i32::MAX; keep them as flat constants
            // and let the safe layer cast status words to i32.
            .default_enum_style(bindgen::EnumVariation::Consts)
            .derive_debug(true)
            .derive_default(true)
            .generate()
            .expect("Unable to generate DCAM bindings");

        let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
        bindings
            .write_to_file(out_path.join("bindings.rs"))
            .expect("Couldn't write bindings!");

        println!("cargo:rustc-link-search=native={}", sdk_lib_path.display());

        #[cfg(target_os = "windows")]
        {
            println!("cargo:rustc-link-lib=dcamapi");
        }
        #[cfg(target_os = "linux")]
        {
            println!("cargo:rustc-link-lib=dcamapi"); // libdcamapi.so
        }
    }
    #[cfg(not(feature = "dcam-sdk"))]
    {
        let out_path = PathBuf::from(env::var("OUT_DIR").unwrap());
        std::fs::write(
            out_path.join("bindings.rs"),
            "// Dummy bindings when dcam-sdk feature is not enabled\n",
        )
        .expect("Couldn't write dummy bindings!");
    }
}
