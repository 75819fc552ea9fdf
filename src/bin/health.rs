use std::env;
use std::error;

use url::Url;

fn main() -> Result<(), Box<dyn error::Error>> {
    let args: Vec<String> = env::args().collect();
    let target = args
        .get(1)
        .map(String::as_str)
        .unwrap_or("http://127.0.0.1:10000/health");

    let url = Url::parse(target)?;
    let response = reqwest::blocking::get(url.as_str())?;
    if !response.status().is_success() {
        panic!("Health check failed with status {}", response.status())
    }

    Ok(())
}
