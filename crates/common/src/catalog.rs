//! Built-in country catalog

use crate::db::Repository;
use crate::errors::Result;
use tracing::info;

/// Tracked countries with their map region
pub const COUNTRIES: &[(&str, &str)] = &[
    ("Afghanistan", "Asia"),
    ("Albania", "Europe"),
    ("Algeria", "Africa"),
    ("American Samoa", "Oceania"),
    ("Andorra", "Europe"),
    ("Angola", "Africa"),
    ("Anguilla", "Caribbean"),
    ("Antigua and Barbuda", "Caribbean"),
    ("Argentina", "South America"),
    ("Armenia", "Asia"),
    ("Aruba", "Caribbean"),
    ("Australia", "Oceania"),
    ("Austria", "Europe"),
    ("Azerbaijan", "Asia"),
];

/// Subreddit name for a country: `&` spelled out, commas and spaces dropped
pub fn subreddit_for(country: &str) -> String {
    country
        .replace(" & ", "and")
        .replace('&', "and")
        .replace([',', ' '], "")
}

/// Map region of a catalog country
pub fn region_for(country: &str) -> Option<&'static str> {
    COUNTRIES
        .iter()
        .find(|(name, _)| *name == country)
        .map(|(_, region)| *region)
}

/// Make sure every catalog country exists; returns how many are known
pub async fn seed_catalog(repo: &Repository) -> Result<usize> {
    for (name, _) in COUNTRIES {
        repo.upsert_country_by_name(name, &subreddit_for(name)).await?;
    }

    info!(countries = COUNTRIES.len(), "Country catalog seeded");
    Ok(COUNTRIES.len())
}
