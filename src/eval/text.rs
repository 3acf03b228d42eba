//! Corpus-level text metrics for NLP evaluation.

use std::collections::BTreeMap;
use std::collections::HashMap;

/// Highest n-gram order used by BLEU.
const BLEU_MAX_ORDER: usize = 4;

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn ngram_counts(tokens: &[String], n: usize) -> HashMap<&[String], usize> {
    let mut counts = HashMap::new();
    if tokens.len() < n {
        return counts;
    }
    for window in tokens.windows(n) {
        *counts.entry(window).or_insert(0) += 1;
    }
    counts
}

/// Corpus BLEU on a 0-1 scale: clipped modified n-gram precision up to
/// order 4, geometric mean, brevity penalty. Zero when any order has no
/// matches.
pub fn corpus_bleu(predictions: &[String], references: &[String]) -> f64 {
    let pairs: Vec<(Vec<String>, Vec<String>)> = predictions
        .iter()
        .zip(references)
        .map(|(p, r)| (tokenize(p), tokenize(r)))
        .collect();

    if pairs.is_empty() {
        return 0.0;
    }

    let hyp_len: usize = pairs.iter().map(|(p, _)| p.len()).sum();
    let ref_len: usize = pairs.iter().map(|(_, r)| r.len()).sum();
    if hyp_len == 0 {
        return 0.0;
    }

    let mut log_precision_sum = 0.0;
    for n in 1..=BLEU_MAX_ORDER {
        let mut matches = 0usize;
        let mut total = 0usize;
        for (pred, reference) in &pairs {
            let pred_counts = ngram_counts(pred, n);
            let ref_counts = ngram_counts(reference, n);
            for (gram, count) in &pred_counts {
                total += count;
                if let Some(ref_count) = ref_counts.get(gram) {
                    matches += count.min(ref_count);
                }
            }
        }
        if matches == 0 || total == 0 {
            return 0.0;
        }
        log_precision_sum += (matches as f64 / total as f64).ln();
    }

    let brevity_penalty = if hyp_len >= ref_len {
        1.0
    } else {
        (1.0 - ref_len as f64 / hyp_len as f64).exp()
    };

    brevity_penalty * (log_precision_sum / BLEU_MAX_ORDER as f64).exp()
}

fn f_measure(overlap: f64, pred_total: f64, ref_total: f64) -> f64 {
    if pred_total == 0.0 || ref_total == 0.0 {
        return 0.0;
    }
    let precision = overlap / pred_total;
    let recall = overlap / ref_total;
    if precision + recall == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / (precision + recall)
}

fn rouge_n(pred: &[String], reference: &[String], n: usize) -> f64 {
    let pred_counts = ngram_counts(pred, n);
    let ref_counts = ngram_counts(reference, n);

    let overlap: usize = pred_counts
        .iter()
        .filter_map(|(gram, count)| ref_counts.get(gram).map(|rc| *count.min(rc)))
        .sum();
    let pred_total: usize = pred_counts.values().sum();
    let ref_total: usize = ref_counts.values().sum();

    f_measure(overlap as f64, pred_total as f64, ref_total as f64)
}

fn lcs_length(a: &[String], b: &[String]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut current = vec![0usize; b.len() + 1];
    for token_a in a {
        for (j, token_b) in b.iter().enumerate() {
            current[j + 1] = if token_a == token_b {
                prev[j] + 1
            } else {
                prev[j + 1].max(current[j])
            };
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

fn rouge_l(pred: &[String], reference: &[String]) -> f64 {
    let lcs = lcs_length(pred, reference);
    f_measure(lcs as f64, pred.len() as f64, reference.len() as f64)
}

/// ROUGE-1/2/L F-measures averaged over all prediction/reference pairs.
pub fn rouge_scores(predictions: &[String], references: &[String]) -> BTreeMap<String, f64> {
    let pairs: Vec<(Vec<String>, Vec<String>)> = predictions
        .iter()
        .zip(references)
        .map(|(p, r)| (tokenize(p), tokenize(r)))
        .collect();

    let mut rouge1 = 0.0;
    let mut rouge2 = 0.0;
    let mut rougel = 0.0;
    for (pred, reference) in &pairs {
        rouge1 += rouge_n(pred, reference, 1);
        rouge2 += rouge_n(pred, reference, 2);
        rougel += rouge_l(pred, reference);
    }

    let n = pairs.len().max(1) as f64;
    let mut scores = BTreeMap::new();
    scores.insert("rouge1".to_string(), rouge1 / n);
    scores.insert("rouge2".to_string(), rouge2 / n);
    scores.insert("rougeL".to_string(), rougel / n);
    scores
}
