mod plan;
mod probe;

use std::{error::Error, fs, path::Path};

use serde::de::DeserializeOwned;

pub use plan::handle_plan;
pub use probe::handle_probe;

pub type HandlerResult = Result<(), Box<dyn Error>>;

fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, Box<dyn Error>> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|error| format!("{}: {error}", path.display()))?;
    let value = serde_json::from_str(&contents).map_err(|error| format!("{}: {error}", path.display()))?;
    Ok(value)
}
