//! PAR2 file naming conventions
//!
//! A PAR2 set is `<base>.par2` (index, no recovery blocks) plus volumes named
//! `<base>.volNNN+MMM.par2`, where `MMM` is the number of recovery blocks the
//! volume carries. Files belong to the same set when their bases match.

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

/// Candidate PAR2 file names, in a stable order
pub type FileList = Vec<String>;

const PAR2_EXTENSION: &str = ".par2";

// The pattern is a literal; compilation cannot fail.
#[allow(clippy::expect_used)]
static VOLUME_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.vol\d*[+-](\d+)$").expect("valid volume regex"));

/// Split a PAR2 file name into `(base_len, blocks)`
///
/// Matching is ASCII case-insensitive. Anything after the last `.par2` is
/// ignored. Returns `None` for names that are not PAR2 files; such files are
/// simply left out of block accounting.
///
/// ```
/// use usenet_postproc::parity::parse_par_filename;
///
/// assert_eq!(parse_par_filename("Show.S01E01.par2"), Some((11, 0)));
/// assert_eq!(parse_par_filename("Show.S01E01.vol03+04.PAR2"), Some((11, 4)));
/// assert_eq!(parse_par_filename("Show.S01E01.mkv"), None);
/// ```
pub fn parse_par_filename(filename: &str) -> Option<(usize, u32)> {
    let lower = filename.to_ascii_lowercase();
    if lower.len() < PAR2_EXTENSION.len() + 1 {
        return None;
    }

    let end = lower.rfind(PAR2_EXTENSION)? + PAR2_EXTENSION.len();
    let stem = &lower[..end - PAR2_EXTENSION.len()];

    match VOLUME_SUFFIX.captures(stem) {
        Some(caps) => {
            let suffix = caps.get(0)?;
            let blocks = caps.get(1)?.as_str().parse::<u32>().ok()?;
            Some((suffix.start(), blocks))
        }
        None => Some((stem.len(), 0)),
    }
}

/// Whether two PAR2 file names belong to the same set
pub fn same_par_collection(first: &str, second: &str) -> bool {
    let (Some((first_len, _)), Some((second_len, _))) =
        (parse_par_filename(first), parse_par_filename(second))
    else {
        return false;
    };
    if first_len != second_len {
        return false;
    }
    match (first.get(..first_len), second.get(..second_len)) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}

/// PAR2 files in a directory with their block counts, sorted by name
pub async fn list_par_files(dir: &Path) -> std::io::Result<Vec<(String, u32)>> {
    let mut found = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if let Some((_, blocks)) = parse_par_filename(&name) {
            found.push((name, blocks));
        }
    }

    found.sort();
    Ok(found)
}

/// One representative file per PAR2 set in `dir`
///
/// Prefers the file with the fewest recovery blocks, i.e. the index file when
/// present. The list is sorted by name.
pub async fn find_main_pars(dir: &Path) -> std::io::Result<FileList> {
    let mut candidates = list_par_files(dir).await?;
    candidates.sort_by(|(a_name, a_blocks), (b_name, b_blocks)| {
        a_blocks.cmp(b_blocks).then_with(|| a_name.cmp(b_name))
    });

    let mut mains: FileList = Vec::new();
    for (name, _) in candidates {
        if !mains.iter().any(|main| same_par_collection(main, &name)) {
            mains.push(name);
        }
    }

    mains.sort();
    Ok(mains)
}

/// Files on disk in the same set as `par_filename`, with their block counts
pub async fn find_set_files(
    dir: &Path,
    par_filename: &str,
) -> std::io::Result<Vec<(String, u32)>> {
    Ok(list_par_files(dir)
        .await?
        .into_iter()
        .filter(|(name, _)| same_par_collection(par_filename, name))
        .collect())
}
