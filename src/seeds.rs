// Well-known v3 onion directories and search engines. Used when crawl is
// started without --seeds.
pub const DEFAULT_SEEDS: &[&str] = &[
    "http://zqktlwiuavvvqqt4ybvgvi7tyo4hjl5xgfuvpdf6otjiycgwqbym2qad.onion/wiki/index.php/Main_Page",
    "http://dreadytofatroptsdj6io7l3xptbet6onoyno2yv7jicoxknyazubrad.onion/",
    "http://s4k4ceiapwwgcm3mkb6e4diqecpo7kvdnfr5gg7sph7jjppqkvwwqtyd.onion/",
    "http://torchdeedp3i2jigzjdmfpn5ttjhthh5wbmda2rr3jvqjg5p77c54dqd.onion/",
    "http://juhanurmihxlp77nkq76byazcldy2hlmovfu2epvl5ankdibsot4csyd.onion/",
    "http://tor66sewebgixwhcqfnp5inzp5x5uohhdy3kvtnyfxc2e5mxiuh34iid.onion/",
];

/// Resolve the seed CLI arguments into a URL list: a single seed, a file of
/// URLs, a comma-separated list, or the built-in defaults.
pub fn collect_seeds(seeds: Option<String>, seed: Option<String>) -> anyhow::Result<Vec<String>> {
    let mut urls: Vec<String> = Vec::new();

    if let Some(s) = seed {
        urls.push(s);
    }
    if let Some(seeds_arg) = seeds {
        if std::path::Path::new(&seeds_arg).exists() {
            let content = std::fs::read_to_string(&seeds_arg)?;
            urls.extend(
                content
                    .lines()
                    .map(|l| l.trim().to_string())
                    .filter(|l| !l.is_empty()),
            );
        } else {
            urls.extend(seeds_arg.split(',').map(|s| s.trim().to_string()));
        }
    }

    if urls.is_empty() {
        urls.extend(DEFAULT_SEEDS.iter().map(|s| s.to_string()));
    }
    Ok(urls)
}
