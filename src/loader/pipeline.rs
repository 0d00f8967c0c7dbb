//! Bulk Loader (C6) — batch assembly, flush, and progress-reporting
//! stages. The line/term stages live in [`crate::loader::ntriples`];
//! this module drives them against a bounded batch and flushes each
//! batch through [`crate::quad::QuadApi::add_quads`] inside the load's
//! `Txn`.
//!
//! The loader itself never toggles indexes — that's the orchestrator's
//! job (C12), since index strategy is a property of the whole import,
//! not of one file.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use crate::config::BulkLoadOptions;
use crate::error::Result;
use crate::loader::ntriples::{self, ParseStats, ParsedQuad};
use crate::quad::QuadApi;
use crate::term::Term;
use crate::txn::Txn;

#[derive(Debug, Clone, Default)]
pub struct LoadProgress {
    pub processed: usize,
    pub elapsed_secs: f64,
    pub rate_per_sec: f64,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub quad_count: u64,
    pub term_count: u64,
    pub blank_node_count: usize,
    pub malformed_uri_count: usize,
    pub elapsed_secs: f64,
}

fn to_quad(space_id: &str, parsed: ParsedQuad, default_graph: &Term) -> (Term, Term, Term, Term) {
    let subject = parsed.subject.into_term(space_id);
    let predicate = parsed.predicate.into_term(space_id);
    let object = parsed.object.into_term(space_id);
    let graph = parsed
        .graph
        .map(|g| g.into_term(space_id))
        .unwrap_or_else(|| default_graph.clone());
    (subject, predicate, object, graph)
}

/// Derives UUIDs for a whole batch of parsed quads in parallel. Each
/// term's UUID is a pure SHA-1 hash (C1) with no shared state, so a
/// batch of a few thousand lines is an easy `rayon` fan-out rather than
/// a serial loop down the hot path of a bulk load.
fn to_quads_parallel(space_id: &str, parsed: Vec<ParsedQuad>, default_graph: &Term) -> Vec<(Term, Term, Term, Term)> {
    parsed
        .into_par_iter()
        .map(|quad| to_quad(space_id, quad, default_graph))
        .collect()
}

/// Streams `path`, flushing a batch of at most `options.batch_size`
/// quads at a time into `txn`. Calls `on_progress` after every flush
/// whose cumulative processed count has advanced by at least
/// `options.progress_interval` since the last call, and once more at
/// the end regardless. On a parse error the first failing line's error
/// (with its 1-based line number) is returned immediately; the caller
/// is responsible for rolling back `txn`.
pub async fn load_file<F>(
    quads: &QuadApi,
    space_id: &str,
    path: &str,
    default_graph: &Term,
    options: &BulkLoadOptions,
    txn: &Arc<Txn>,
    mut on_progress: F,
) -> Result<LoadReport>
where
    F: FnMut(LoadProgress),
{
    let (format, gzipped) = ntriples::detect_format(path)?;
    let reader = ntriples::open_reader(path, gzipped)?;

    let start = Instant::now();
    let mut batch: Vec<ParsedQuad> = Vec::with_capacity(options.batch_size);
    let mut report = LoadReport::default();
    let mut processed = 0usize;
    let mut since_progress = 0usize;
    let mut parse_stats = ParseStats::default();

    use std::io::BufRead;
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let parsed = ntriples::parse_line(trimmed, line_no, format, &mut parse_stats)?;
        batch.push(parsed);

        if batch.len() >= options.batch_size {
            let flushed = batch.len();
            flush(quads, space_id, &mut batch, default_graph, txn, &mut report).await?;
            processed += flushed;
            since_progress += flushed;
            if since_progress >= options.progress_interval {
                emit_progress(&mut on_progress, processed, start);
                since_progress = 0;
            }
        }
    }
    if !batch.is_empty() {
        let flushed = batch.len();
        flush(quads, space_id, &mut batch, default_graph, txn, &mut report).await?;
        processed += flushed;
    }
    emit_progress(&mut on_progress, processed, start);

    report.blank_node_count = parse_stats.blank_node_count;
    report.malformed_uri_count = parse_stats.malformed_uri_count;
    report.elapsed_secs = start.elapsed().as_secs_f64();
    Ok(report)
}

async fn flush(
    quads: &QuadApi,
    space_id: &str,
    batch: &mut Vec<ParsedQuad>,
    default_graph: &Term,
    txn: &Arc<Txn>,
    report: &mut LoadReport,
) -> Result<()> {
    let parsed = std::mem::take(batch);
    let resolved = to_quads_parallel(space_id, parsed, default_graph);
    let result = quads.add_quads(space_id, &resolved, txn).await?;
    report.quad_count += result.quads_inserted;
    report.term_count += result.terms_inserted;
    Ok(())
}

fn emit_progress<F: FnMut(LoadProgress)>(on_progress: &mut F, processed: usize, start: Instant) {
    let elapsed = start.elapsed().as_secs_f64();
    let rate = processed as f64 / elapsed.max(0.001);
    tracing::debug!(processed, elapsed_secs = elapsed, rate_per_sec = rate, "bulk load progress");
    on_progress(LoadProgress {
        processed,
        elapsed_secs: elapsed,
        rate_per_sec: rate,
    });
}

/// Validate-first: parses the whole file without writing anything,
/// returning the same stats a real load would produce. Used by C12's
/// `validate_first` import method.
pub fn validate_file(path: &str) -> Result<ParseStats> {
    let (format, gzipped) = ntriples::detect_format(path)?;
    let reader = ntriples::open_reader(path, gzipped)?;
    ntriples::stream_quads(reader, format, |_| Ok(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_file_counts_without_touching_database() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("vitalgraph_test_{}.nt", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            "<http://ex/a> <http://ex/p> \"hello\" .\n\
             <http://ex/a> <http://ex/p> \"world\"@en .\n\
             <http://ex/a> <http://ex/q> <http://ex/b> .\n",
        )
        .unwrap();
        let stats = validate_file(path.to_str().unwrap()).unwrap();
        assert_eq!(stats.quad_count, 3);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn validate_file_rejects_unknown_extension() {
        assert!(validate_file("/tmp/does-not-matter.ttl").is_err());
    }

    #[test]
    fn parallel_term_derivation_matches_serial_derivation() {
        use pretty_assertions::assert_eq;

        let mut stats = ParseStats::default();
        let lines = [
            r#"<http://ex/a> <http://ex/p> "one" ."#,
            r#"<http://ex/b> <http://ex/p> "two" ."#,
            r#"<http://ex/c> <http://ex/p> "three" ."#,
        ];
        let parsed: Vec<ParsedQuad> = lines
            .iter()
            .enumerate()
            .map(|(i, line)| ntriples::parse_line(line, i + 1, ntriples::RdfFormat::NTriples, &mut stats).unwrap())
            .collect();
        let default_graph = Term::uri("http://ex/default-graph");

        let serial: Vec<(Term, Term, Term, Term)> = parsed
            .clone()
            .into_iter()
            .map(|q| to_quad("s1", q, &default_graph))
            .collect();
        let parallel = to_quads_parallel("s1", parsed, &default_graph);

        assert_eq!(serial.len(), parallel.len());
        for (s, p) in serial.iter().zip(parallel.iter()) {
            assert_eq!(s.0.uuid, p.0.uuid);
            assert_eq!(s.1.uuid, p.1.uuid);
            assert_eq!(s.2.uuid, p.2.uuid);
            assert_eq!(s.3.uuid, p.3.uuid);
        }
    }
}
