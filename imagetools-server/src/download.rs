/// Build a download file name: `<stem>-<suffix>[-<dimensions>].<extension>`.
///
/// The stem is the original name minus its last extension, or `image` when no name is known.
pub fn download_filename(
    original: Option<&str>,
    suffix: &str,
    dimensions: Option<&str>,
    extension: &str,
) -> String {
    let stem = original
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(|n| match n.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => n,
        })
        .unwrap_or("image");
    // header values must stay visible ASCII
    let stem: String = stem
        .chars()
        .map(|c| match c {
            '"' | '/' | '\\' => '_',
            c if !c.is_ascii() || c.is_ascii_control() => '_',
            c => c,
        })
        .collect();
    match dimensions {
        Some(d) => format!("{stem}-{suffix}-{d}.{extension}"),
        None => format!("{stem}-{suffix}.{extension}"),
    }
}
