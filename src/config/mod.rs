mod settings;

pub use settings::{
    Config, DevtoolsConfig, RuntimeEnv, TomlConfig, TomlDevtoolsConfig, EXAMPLE_CONFIG,
};
