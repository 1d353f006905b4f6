use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Worst-case pool alignment: 2 * sizeof(usize) on 64-bit targets.
/// Class data sizes must be multiples of this so block strides stay aligned.
const ALIGN: usize = 16;

/// Number of per-class count fields on `PoolSettings`
/// (num_32_bytes_blocks .. num_4096_bytes_blocks).
const NUM_SETTINGS_CLASS_FIELDS: usize = 8;

#[derive(Deserialize, Default)]
struct ConfigSection {
    error_message_size: Option<usize>,
    dump_file_name_size: Option<usize>,
}

#[derive(Deserialize, Default)]
struct Config {
    #[serde(default)]
    config: ConfigSection,
    #[serde(default)]
    classes: Vec<usize>,
}

struct ResolvedConfig {
    error_message_size: usize,
    dump_file_name_size: usize,
}

fn resolve_config(cfg: &ConfigSection) -> ResolvedConfig {
    let error_message_size = cfg.error_message_size.unwrap_or(512);
    let dump_file_name_size = cfg.dump_file_name_size.unwrap_or(128);

    assert!(
        error_message_size >= 128,
        "error_message_size ({}) must be >= 128 to fit every message plus a location suffix",
        error_message_size
    );
    assert!(
        error_message_size.is_multiple_of(ALIGN),
        "error_message_size ({}) must be a multiple of {}",
        error_message_size,
        ALIGN
    );
    assert!(
        dump_file_name_size > 0,
        "dump_file_name_size must be > 0"
    );
    assert!(
        dump_file_name_size.is_multiple_of(ALIGN),
        "dump_file_name_size ({}) must be a multiple of {}",
        dump_file_name_size,
        ALIGN
    );

    ResolvedConfig {
        error_message_size,
        dump_file_name_size,
    }
}

fn validate_classes(sizes: &[usize]) {
    assert_eq!(
        sizes.len(),
        NUM_SETTINGS_CLASS_FIELDS,
        "FIXPOOL_CONFIG: expected exactly {} class sizes (one per PoolSettings count field), got {}",
        NUM_SETTINGS_CLASS_FIELDS,
        sizes.len()
    );
    for (i, &size) in sizes.iter().enumerate() {
        assert!(size > 0, "class {}: size must be > 0", i);
        assert!(
            size.is_multiple_of(ALIGN),
            "class {}: size {} must be a multiple of {}",
            i,
            size,
            ALIGN
        );
        if i > 0 {
            assert!(
                size > sizes[i - 1],
                "class {}: size {} must be > previous size {}",
                i,
                size,
                sizes[i - 1]
            );
        }
    }
}

fn default_config_path() -> String {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    format!("{}/fixpool.toml", manifest_dir)
}

fn generate_config(cfg: &ResolvedConfig, sizes: &[usize], out_path: &Path) {
    let mut code = String::from("// Auto-generated by build.rs. Do not edit.\n\n");

    code.push_str(&format!(
        "pub const NUM_CLASSES: usize = {};\n",
        sizes.len()
    ));
    code.push_str(&format!(
        "pub const ERROR_MESSAGE_SIZE: usize = {};\n",
        cfg.error_message_size
    ));
    code.push_str(&format!(
        "pub const DUMP_FILE_NAME_SIZE: usize = {};\n\n",
        cfg.dump_file_name_size
    ));

    code.push_str("pub static CLASS_DATA_SIZES: [usize; NUM_CLASSES] = [\n");
    for size in sizes {
        code.push_str(&format!("    {},\n", size));
    }
    code.push_str("];\n");

    fs::write(out_path, code).expect("failed to write config_gen.rs");
}

fn main() {
    println!("cargo:rerun-if-env-changed=FIXPOOL_CONFIG");

    let out_dir = env::var("OUT_DIR").unwrap();

    let config_path = env::var("FIXPOOL_CONFIG").unwrap_or_else(|_| default_config_path());
    println!("cargo:rerun-if-changed={}", config_path);
    let content = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| panic!("failed to read {}: {}", config_path, e));

    let config: Config = toml::from_str(&content).expect("failed to parse TOML config");

    let resolved = resolve_config(&config.config);
    validate_classes(&config.classes);

    generate_config(
        &resolved,
        &config.classes,
        &Path::new(&out_dir).join("config_gen.rs"),
    );
}
