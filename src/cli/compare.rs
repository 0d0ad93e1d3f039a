//! Compare two release version strings

use std::cmp::Ordering;

use anyhow::Result;
use colored::Colorize;

use crate::version::Version;

pub fn run(a: &str, b: &str) -> Result<()> {
    let left = Version::parse(a)?;
    let right = Version::parse(b)?;

    let symbol = match left.cmp(&right) {
        Ordering::Less => "<",
        Ordering::Equal => "=",
        Ordering::Greater => ">",
    };

    println!(
        "{} {} {}",
        left.to_string().bold(),
        symbol.cyan().bold(),
        right.to_string().bold()
    );
    println!(
        "  {}: {} vs {}",
        "Normalized".cyan(),
        left.canonical(),
        right.canonical()
    );

    Ok(())
}
