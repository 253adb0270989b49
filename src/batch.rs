//! Batch driver: the whole pipeline over a set of files.
//!
//! Loads and merges observations once, then runs each requested file
//! through parse, plan and patch. Failures are file-local: a file that
//! cannot be parsed or written is reported and the rest of the batch
//! proceeds. Only an unusable observation file aborts the run.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::cst::{parse_module, ParseError};
use crate::diff::unified_diff;
use crate::error::{ExitStatus, WeldError};
use crate::merge::merge_records;
use crate::parse::load_observations;
use crate::patch::apply_insertions;
use crate::plan::{plan_file, FilePlan, PlannedSite, SkippedSite, Style};
use crate::sites::SiteIndex;
use crate::types::MergeOptions;

/// Knobs for one batch run.
#[derive(Debug, Clone, Default)]
pub struct BatchOptions {
    pub style: Style,
    /// Write files in place instead of printing diffs.
    pub write: bool,
    pub merge: MergeOptions,
}

/// Outcome for one requested file.
#[derive(Debug, Clone)]
pub struct FileReport {
    pub path: String,
    pub annotated: Vec<PlannedSite>,
    pub skipped: Vec<SkippedSite>,
    /// Functions in the file with no observed signature.
    pub unmatched: Vec<(String, u32)>,
    /// Unified diff of the planned change; empty when nothing changes or
    /// when the change was written in place.
    pub diff: String,
    pub written: bool,
    pub error: Option<String>,
}

impl FileReport {
    fn failed(path: String, error: String) -> Self {
        FileReport {
            path,
            annotated: Vec::new(),
            skipped: Vec::new(),
            unmatched: Vec::new(),
            diff: String::new(),
            written: false,
            error: Some(error),
        }
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
}

impl BatchReport {
    pub fn annotated_total(&self) -> usize {
        self.files.iter().map(|f| f.annotated.len()).sum()
    }

    pub fn failed_total(&self) -> usize {
        self.files.iter().filter(|f| f.error.is_some()).count()
    }

    pub fn exit_status(&self) -> ExitStatus {
        if self.failed_total() > 0 {
            ExitStatus::FileFailures
        } else {
            ExitStatus::Success
        }
    }
}

/// Expand the requested paths: directories are walked for `.py` files,
/// everything else is taken as given.
pub fn discover_files(paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }
    files
}

/// Annotate one source text. The core single-file entry point; the CLI,
/// the batch loop and the tests all go through here.
pub fn patch_source(
    source: &str,
    path: &str,
    sites: &mut SiteIndex,
    style: Style,
) -> Result<(String, FilePlan), ParseError> {
    let module = parse_module(source)?;
    let plan = plan_file(&module, source, path, sites, style);
    let patched = apply_insertions(source, &plan.insertions);
    Ok((patched, plan))
}

/// Run the full pipeline: load observations, then process every file.
pub fn run_batch(
    observations: &Path,
    files: &[PathBuf],
    options: &BatchOptions,
) -> Result<BatchReport, WeldError> {
    let records = load_observations(observations)?;
    info!(records = records.len(), "loaded observation records");
    let merged = merge_records(&records, &options.merge);
    debug!(sites = merged.len(), "merged call sites");
    let mut sites = SiteIndex::new(merged);

    let mut report = BatchReport::default();
    for file in files {
        report.files.push(process_file(file, &mut sites, options));
    }
    Ok(report)
}

fn process_file(file: &Path, sites: &mut SiteIndex, options: &BatchOptions) -> FileReport {
    let path = file.display().to_string();

    let source = match fs::read_to_string(file) {
        Ok(source) => source,
        Err(err) => {
            let error = WeldError::parse_failure(path.as_str(), err);
            warn!("{error}");
            return FileReport::failed(path, error.to_string());
        }
    };

    let (patched, plan) = match patch_source(&source, &path, sites, options.style) {
        Ok(result) => result,
        Err(err) => {
            let error = WeldError::parse_failure(path.as_str(), err);
            warn!("{error}");
            return FileReport::failed(path, error.to_string());
        }
    };
    sites.report_unclaimed(&path);

    let changed = !plan.insertions.is_empty();
    let mut written = false;
    let mut diff = String::new();
    let mut error = None;

    if changed {
        if options.write {
            match fs::write(file, &patched) {
                Ok(()) => {
                    written = true;
                    info!(path = %path, functions = plan.annotated.len(), "annotated");
                }
                Err(err) => {
                    let write_error = WeldError::write_failure(path.as_str(), err);
                    warn!("{write_error}");
                    error = Some(write_error.to_string());
                }
            }
        } else {
            diff = unified_diff(&path, &source, &plan.insertions);
        }
    } else {
        debug!(path = %path, "no changes");
    }

    FileReport {
        path,
        annotated: plan.annotated,
        skipped: plan.skipped,
        unmatched: plan.unmatched,
        diff,
        written,
        error,
    }
}

/// Render the merged signatures as text, the `--dump` view.
///
/// With a non-empty `files` list, only sites whose recorded path matches a
/// listed file exactly or sits under a listed directory are shown.
pub fn dump_annotations(
    observations: &Path,
    files: &[PathBuf],
    options: &MergeOptions,
) -> Result<String, WeldError> {
    let records = load_observations(observations)?;
    let merged = merge_records(&records, options);
    let wanted: Vec<String> = files.iter().map(|f| f.display().to_string()).collect();
    let mut out = String::new();
    for (key, signature) in &merged {
        let selected = wanted.is_empty()
            || wanted
                .iter()
                .any(|f| key.path == *f || key.path.starts_with(&format!("{f}/")));
        if selected {
            out.push_str(&format!(
                "{}:{}: in {}:\n    # type: {}\n",
                key.path,
                key.line,
                key.func_name,
                signature.render_comment()
            ));
        }
    }
    Ok(out)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    const GCD_SRC: &str = "\
def gcd(a, b):
    while b:
        a, b = b, a % b
    return a
";

    fn gcd_observations(dir: &Path, recorded_path: &str) -> PathBuf {
        let json = format!(
            r#"[{{"path": "{}", "line": 1, "func_name": "gcd",
                 "type_comments": ["(int, int) -> int"], "samples": 3}}]"#,
            recorded_path
        );
        write_file(dir, "type_info.json", &json)
    }

    mod write_mode {
        use super::*;

        #[test]
        fn annotates_in_place() {
            let dir = tempfile::tempdir().unwrap();
            let py = write_file(dir.path(), "gcd.py", GCD_SRC);
            let obs = gcd_observations(dir.path(), "gcd.py");

            let options = BatchOptions {
                write: true,
                ..Default::default()
            };
            let report = run_batch(&obs, &[py.clone()], &options).unwrap();

            assert_eq!(report.exit_status(), ExitStatus::Success);
            assert_eq!(report.annotated_total(), 1);
            assert!(report.files[0].written);
            let patched = fs::read_to_string(&py).unwrap();
            assert!(patched.contains("    # type: (int, int) -> int\n"));
        }

        #[test]
        fn second_run_leaves_file_alone() {
            let dir = tempfile::tempdir().unwrap();
            let py = write_file(dir.path(), "gcd.py", GCD_SRC);
            let obs = gcd_observations(dir.path(), "gcd.py");
            let options = BatchOptions {
                write: true,
                ..Default::default()
            };

            run_batch(&obs, &[py.clone()], &options).unwrap();
            let once = fs::read_to_string(&py).unwrap();
            let report = run_batch(&obs, &[py.clone()], &options).unwrap();
            let twice = fs::read_to_string(&py).unwrap();

            assert_eq!(once, twice);
            assert_eq!(report.annotated_total(), 0);
            assert!(!report.files[0].written);
        }
    }

    mod preview_mode {
        use super::*;

        #[test]
        fn prints_diff_without_touching_the_file() {
            let dir = tempfile::tempdir().unwrap();
            let py = write_file(dir.path(), "gcd.py", GCD_SRC);
            let obs = gcd_observations(dir.path(), "gcd.py");

            let report = run_batch(&obs, &[py.clone()], &BatchOptions::default()).unwrap();

            assert!(report.files[0].diff.contains("+    # type: (int, int) -> int"));
            assert_eq!(fs::read_to_string(&py).unwrap(), GCD_SRC);
        }

        #[test]
        fn recorded_path_suffix_matches_requested_file() {
            let dir = tempfile::tempdir().unwrap();
            let proj = dir.path().join("proj");
            fs::create_dir(&proj).unwrap();
            let py = write_file(&proj, "gcd.py", GCD_SRC);
            let obs = gcd_observations(dir.path(), "proj/gcd.py");

            let report = run_batch(&obs, &[py], &BatchOptions::default()).unwrap();
            assert!(!report.files[0].diff.is_empty());
        }
    }

    mod failures {
        use super::*;

        #[test]
        fn missing_observation_file_is_fatal() {
            let dir = tempfile::tempdir().unwrap();
            let err = run_batch(
                &dir.path().join("absent.json"),
                &[],
                &BatchOptions::default(),
            )
            .unwrap_err();
            assert_eq!(err.exit_status(), ExitStatus::InvalidInput);
        }

        #[test]
        fn unparseable_file_is_local() {
            let dir = tempfile::tempdir().unwrap();
            let good = write_file(dir.path(), "gcd.py", GCD_SRC);
            let bad = write_file(dir.path(), "bad.py", "x = 'unterminated\n");
            let obs = gcd_observations(dir.path(), "gcd.py");

            let report =
                run_batch(&obs, &[bad, good], &BatchOptions::default()).unwrap();

            assert_eq!(report.exit_status(), ExitStatus::FileFailures);
            assert_eq!(report.failed_total(), 1);
            assert!(!report.files[1].diff.is_empty());
        }

        #[test]
        fn missing_source_file_is_local() {
            let dir = tempfile::tempdir().unwrap();
            let obs = gcd_observations(dir.path(), "gcd.py");
            let report = run_batch(
                &obs,
                &[dir.path().join("absent.py")],
                &BatchOptions::default(),
            )
            .unwrap();
            assert_eq!(report.exit_status(), ExitStatus::FileFailures);
        }
    }

    mod discovery {
        use super::*;

        #[test]
        fn directories_expand_to_python_files() {
            let dir = tempfile::tempdir().unwrap();
            write_file(dir.path(), "a.py", "x = 1\n");
            write_file(dir.path(), "b.txt", "not python\n");
            let sub = dir.path().join("pkg");
            fs::create_dir(&sub).unwrap();
            write_file(&sub, "c.py", "y = 2\n");

            let files = discover_files(&[dir.path().to_path_buf()]);
            let names: Vec<String> = files
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names, vec!["a.py".to_string(), "c.py".to_string()]);
        }

        #[test]
        fn plain_files_pass_through() {
            let files = discover_files(&[PathBuf::from("whatever.py")]);
            assert_eq!(files, vec![PathBuf::from("whatever.py")]);
        }
    }

    mod dump {
        use super::*;

        #[test]
        fn lists_merged_sites() {
            let dir = tempfile::tempdir().unwrap();
            let obs = gcd_observations(dir.path(), "gcd.py");
            let out = dump_annotations(&obs, &[], &MergeOptions::default()).unwrap();
            assert_eq!(out, "gcd.py:1: in gcd:\n    # type: (int, int) -> int\n");
        }

        #[test]
        fn positional_files_filter_the_listing() {
            let dir = tempfile::tempdir().unwrap();
            let obs = gcd_observations(dir.path(), "pkg/gcd.py");

            let hit = dump_annotations(&obs, &[PathBuf::from("pkg")], &MergeOptions::default())
                .unwrap();
            assert!(hit.contains("pkg/gcd.py:1: in gcd:"));

            let miss =
                dump_annotations(&obs, &[PathBuf::from("other")], &MergeOptions::default())
                    .unwrap();
            assert!(miss.is_empty());
        }
    }
}
