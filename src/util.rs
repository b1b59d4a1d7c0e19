use url::Url;

/// Politeness group for a url: its host, or `None` for urls that have no
/// host (which are never paced).
pub fn get_host(url: &str) -> Option<String> {
    let url_ = Url::parse(url).ok()?;
    url_.host_str().map(|x| x.to_owned())
}

/// Grouping key for a url, falling back to the raw url when it has no
/// parseable host so accounting still has somewhere to hang the entry.
pub fn grouping_key(url: &str) -> String {
    get_host(url).unwrap_or_else(|| url.to_owned())
}
