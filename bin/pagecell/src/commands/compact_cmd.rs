use pagecell_tools::browser::aria;
use std::io::Read;

/// Print the compacted form of an aria snapshot.
pub async fn run(file: Option<&str>) -> anyhow::Result<()> {
    let input = match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    println!("{}", aria::compact(&input));
    Ok(())
}
