//! Output verification for resume decisions.
//!
//! A command counts as complete only when its declared outputs exist. For
//! `cactus-blast` steps the produced PAF files are additionally cross-checked
//! against the FASTA files named in the seqfile, catching PAFs that still
//! reference contigs of a regenerated ancestral FASTA.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::core::command::PlannedCommand;
use crate::core::path::resolve_path;
use crate::plan::StepKind;

/// PAF records sampled per file.
pub const PAF_SAMPLE_LIMIT: usize = 200;

/// True when every declared output exists and, for blast steps, the PAF
/// contig names still match the seqfile's FASTA headers.
pub fn outputs_exist(command: &PlannedCommand, base_dir: &Path) -> bool {
    if let Some(missing) = command.outputs.iter().find(|path| !path.exists()) {
        debug!(command = %command.display_name, missing = %missing.display(), "declared output missing");
        return false;
    }
    let is_blast = command
        .step
        .as_ref()
        .is_some_and(|step| step.kind == StepKind::Blast);
    if !is_blast {
        return true;
    }
    let pafs: Vec<&PathBuf> = command
        .outputs
        .iter()
        .filter(|path| path.extension().is_some_and(|ext| ext == "paf"))
        .collect();
    if pafs.is_empty() {
        return true;
    }
    let matches = blast_paf_matches_seqfile(command, base_dir, &pafs);
    if !matches {
        debug!(command = %command.display_name, "PAF contigs do not match seqfile FASTA");
    }
    matches
}

fn blast_paf_matches_seqfile(command: &PlannedCommand, base_dir: &Path, pafs: &[&PathBuf]) -> bool {
    if !command
        .program_name()
        .is_some_and(|name| name.eq_ignore_ascii_case("cactus-blast"))
    {
        return true;
    }
    // cactus-blast <jobstore> <seqfile> <out.paf> ...
    let Some(seqfile) = command.args.get(2).map(|arg| resolve_path(arg, base_dir)) else {
        return true;
    };
    let Ok(mapping) = parse_seqfile_mapping(&seqfile, base_dir) else {
        return true;
    };
    if mapping.is_empty() {
        return true;
    }

    for paf in pafs {
        let Ok(needed) = sample_paf_contigs(paf, PAF_SAMPLE_LIMIT) else {
            continue;
        };
        for (event, contigs) in needed {
            let Some(fasta) = mapping.get(&event) else {
                return false;
            };
            if !fasta_contains_all(fasta, &contigs) {
                return false;
            }
        }
    }
    true
}

/// `name path` lines after the Newick line; blanks and `#` comments skipped.
pub fn parse_seqfile_mapping(seqfile: &Path, base_dir: &Path) -> io::Result<BTreeMap<String, PathBuf>> {
    let reader = BufReader::new(File::open(seqfile)?);
    let mut mapping = BTreeMap::new();
    for line in lossy_lines(reader).skip(1) {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let mut parts = trimmed.split_whitespace();
        if let (Some(name), Some(path)) = (parts.next(), parts.next()) {
            mapping.insert(name.to_string(), resolve_path(path, base_dir));
        }
    }
    Ok(mapping)
}

/// Event → contig names referenced by the first `limit` PAF records.
pub fn sample_paf_contigs(paf: &Path, limit: usize) -> io::Result<BTreeMap<String, BTreeSet<String>>> {
    let reader = BufReader::new(File::open(paf)?);
    let mut needed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut seen = 0;
    for line in lossy_lines(reader) {
        if seen >= limit {
            break;
        }
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = trimmed.split('\t').collect();
        if fields.len() < 6 {
            continue;
        }
        for name in [fields[0], fields[5]] {
            if let Some((event, contig)) = split_paf_name(name) {
                needed
                    .entry(event.to_string())
                    .or_default()
                    .insert(contig.to_string());
            }
        }
        seen += 1;
    }
    Ok(needed)
}

/// `id=event|contig` or `event|contig` → `(event, contig)`.
pub fn split_paf_name(name: &str) -> Option<(&str, &str)> {
    let value = name.trim();
    let value = value.strip_prefix("id=").unwrap_or(value);
    let (event, contig) = value.split_once('|')?;
    if event.is_empty() || contig.is_empty() {
        return None;
    }
    Some((event, contig))
}

fn fasta_contains_all(path: &Path, contigs: &BTreeSet<String>) -> bool {
    if contigs.is_empty() {
        return true;
    }
    let Ok(file) = File::open(path) else {
        return false;
    };
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let mut remaining: BTreeSet<&str> = contigs.iter().map(String::as_str).collect();
    for line in lossy_lines(BufReader::new(reader)) {
        let Ok(line) = line else {
            return false;
        };
        let Some(header) = line.strip_prefix('>') else {
            continue;
        };
        if let Some(name) = header.split_whitespace().next() {
            remaining.remove(name);
            if remaining.is_empty() {
                return true;
            }
        }
    }
    false
}

/// Lines decoded as UTF-8 with invalid bytes replaced.
fn lossy_lines<R: BufRead>(mut reader: R) -> impl Iterator<Item = io::Result<String>> {
    std::iter::from_fn(move || {
        let mut buf = Vec::new();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => None,
            Ok(_) => Some(Ok(String::from_utf8_lossy(&buf).into_owned())),
            Err(err) => Some(Err(err)),
        }
    })
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;
    use crate::plan::Step;
    use crate::test_support::planned;

    fn blast_command(dir: &Path) -> PlannedCommand {
        let mut cmd = planned(
            "blast-Anc0",
            &["cactus-blast", "js", "seq.txt", "Anc0.paf", "--root", "Anc0"],
        );
        cmd.step = Some(Step::new("cactus-blast js seq.txt Anc0.paf --root Anc0", StepKind::Blast));
        cmd.outputs = vec![dir.join("Anc0.paf")];
        cmd
    }

    fn write_fixture(dir: &Path, paf_contig: &str) {
        fs::write(
            dir.join("seq.txt"),
            "((human,chimp)Anc1,gorilla)Anc0;\n\n# comment\nhuman human.fa\nchimp chimp.fa.gz\n",
        )
        .expect("seqfile");
        fs::write(dir.join("human.fa"), ">chr1 description\nACGT\n>chr2\nAC\n").expect("fasta");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b">chrA\nGGCC\n").expect("gz write");
        fs::write(dir.join("chimp.fa.gz"), encoder.finish().expect("gz finish")).expect("gz");
        fs::write(
            dir.join("Anc0.paf"),
            format!(
                "id=human|chr1\t100\t0\t10\t+\tid=chimp|chrA\t100\t0\t10\t10\t10\t60\n\
                 human|{paf_contig}\t100\t0\t10\t+\tchimp|chrA\t100\t0\t10\t10\t10\t60\n"
            ),
        )
        .expect("paf");
    }

    #[test]
    fn missing_declared_output_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cmd = planned("x", &["echo"]);
        cmd.outputs = vec![temp.path().join("out.hal")];
        assert!(!outputs_exist(&cmd, temp.path()));

        fs::write(temp.path().join("out.hal"), "").expect("write");
        assert!(outputs_exist(&cmd, temp.path()));
    }

    #[test]
    fn paf_matching_fasta_headers_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_fixture(temp.path(), "chr2");
        assert!(outputs_exist(&blast_command(temp.path()), temp.path()));
    }

    #[test]
    fn paf_with_stale_contig_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_fixture(temp.path(), "chr9");
        assert!(!outputs_exist(&blast_command(temp.path()), temp.path()));
    }

    #[test]
    fn unknown_event_fails_and_missing_seqfile_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_fixture(temp.path(), "chr1");
        fs::write(
            temp.path().join("Anc0.paf"),
            "gorilla|chrX\t1\t0\t1\t+\thuman|chr1\t1\t0\t1\t1\t1\t60\n",
        )
        .expect("paf");
        assert!(!outputs_exist(&blast_command(temp.path()), temp.path()));

        fs::remove_file(temp.path().join("seq.txt")).expect("remove");
        assert!(outputs_exist(&blast_command(temp.path()), temp.path()));
    }

    #[test]
    fn non_blast_programs_skip_the_cross_check() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_fixture(temp.path(), "chr9");
        let mut cmd = blast_command(temp.path());
        cmd.args[0] = "my-blast".to_string();
        assert!(outputs_exist(&cmd, temp.path()));
    }

    #[test]
    fn paf_names_split_on_first_pipe() {
        assert_eq!(split_paf_name("id=Anc1|chr1|x"), Some(("Anc1", "chr1|x")));
        assert_eq!(split_paf_name("plain"), None);
        assert_eq!(split_paf_name("|chr1"), None);
    }
}
