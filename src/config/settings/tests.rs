use super::*;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.embeddings.api_base, "https://api.openai.com/v1");
    assert_eq!(config.embeddings.model, "text-embedding-ada-002");
    assert_eq!(config.embeddings.api_key_env, "OPENAI_API_KEY");
    assert_eq!(config.embeddings.batch_size, 16);
    assert_eq!(config.embeddings.retry_attempts, 1);
    assert_eq!(config.chunking.chunk_size, 1000);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert_eq!(config.knowledge_base.extensions, vec!["txt".to_string()]);
    assert_eq!(
        config.knowledge_base.fingerprint,
        FingerprintPolicy::PathAndModified
    );
}

#[test]
fn config_validation() {
    let config = Config::default();
    assert!(config.validate().is_ok());

    let mut invalid_config = config.clone();
    invalid_config.embeddings.api_base = "ftp://example.com".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidProtocol(_))
    ));

    let mut invalid_config = config.clone();
    invalid_config.embeddings.model = "  ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embeddings.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embeddings.request_timeout_secs = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embeddings.retry_attempts = 11;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_overlap = invalid_config.chunking.chunk_size;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::OverlapTooLarge(1000, 1000))
    ));

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_size = 10;
    invalid_config.chunking.chunk_overlap = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.knowledge_base.extensions.clear();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::NoExtensions)
    ));

    let mut invalid_config = config;
    invalid_config.knowledge_base.extensions = vec![".txt".to_string()];
    assert!(invalid_config.validate().is_err());
}

#[test]
fn api_base_url_keeps_path_prefix() {
    let config = EmbeddingConfig::default();
    let url = config.api_base_url().expect("default api base is valid");
    assert_eq!(url.as_str(), "https://api.openai.com/v1/");
    assert_eq!(
        url.join("embeddings").expect("can join").as_str(),
        "https://api.openai.com/v1/embeddings"
    );
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let mut parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    parsed_config.base_dir = config.base_dir.clone();
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let partial = r#"
        [chunking]
        chunk_size = 500
        chunk_overlap = 50

        [knowledge_base]
        fingerprint = "path_only"
    "#;

    let config: Config = toml::from_str(partial).expect("partial config parses");
    assert_eq!(config.chunking.chunk_size, 500);
    assert_eq!(config.chunking.chunk_overlap, 50);
    assert_eq!(config.knowledge_base.fingerprint, FingerprintPolicy::PathOnly);
    assert_eq!(config.embeddings, EmbeddingConfig::default());
}

#[test]
fn setter_validation() {
    let mut config = EmbeddingConfig::default();

    assert!(
        config
            .set_api_base("http://localhost:8080/v1".to_string())
            .is_ok()
    );
    assert!(config.set_model("text-embedding-3-small".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());
    assert!(config.set_request_timeout_secs(60).is_ok());

    assert!(config.set_api_base("not a url".to_string()).is_err());
    assert!(config.set_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_request_timeout_secs(0).is_err());

    assert_eq!(config.api_base, "http://localhost:8080/v1");
    assert_eq!(config.model, "text-embedding-3-small");
    assert_eq!(config.batch_size, 128);
}

#[test]
fn load_missing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("missing config falls back to defaults");

    assert_eq!(config.base_dir, temp_dir.path());
    assert_eq!(config.embeddings, EmbeddingConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let base_dir = temp_dir.path().join("nested");

    let mut config = Config::with_base_dir(&base_dir);
    config.embeddings.model = "custom-model".to_string();
    config.knowledge_base.fingerprint = FingerprintPolicy::PathOnly;
    config.save().expect("config saves");

    assert!(config.config_file_path().exists());

    let loaded = Config::load(&base_dir).expect("config loads");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(
        temp_dir.path().join("config.toml"),
        "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n",
    )
    .expect("can write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn derived_paths() {
    let config = Config::with_base_dir("/srv/yucca");
    assert_eq!(config.config_file_path(), Path::new("/srv/yucca/config.toml"));
    assert_eq!(config.vector_store_path(), Path::new("/srv/yucca/vectorstore"));
    assert_eq!(
        config.manifest_path(),
        Path::new("/srv/yucca/processed_files.json")
    );
    assert_eq!(config.knowledge_base_dir(), Path::new("/srv/yucca/kb"));

    let mut absolute = config;
    absolute.knowledge_base.source_dir = PathBuf::from("/data/kb");
    assert_eq!(absolute.knowledge_base_dir(), Path::new("/data/kb"));
}

#[test]
#[serial]
fn base_dir_env_override() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    // SAFETY: serialized with the other tests touching the environment
    unsafe { env::set_var(BASE_DIR_ENV, temp_dir.path()) };
    let resolved = Config::default_base_dir();
    unsafe { env::remove_var(BASE_DIR_ENV) };

    assert_eq!(resolved.expect("env dir resolves"), temp_dir.path());
}

#[test]
#[serial]
fn api_key_from_environment() {
    let config = EmbeddingConfig {
        api_key_env: "YUCCA_KB_TEST_API_KEY".to_string(),
        ..EmbeddingConfig::default()
    };

    // SAFETY: serialized with the other tests touching the environment
    unsafe { env::remove_var("YUCCA_KB_TEST_API_KEY") };
    assert_eq!(config.api_key(), None);

    unsafe { env::set_var("YUCCA_KB_TEST_API_KEY", "sk-test") };
    assert_eq!(config.api_key().as_deref(), Some("sk-test"));

    unsafe { env::remove_var("YUCCA_KB_TEST_API_KEY") };
}
