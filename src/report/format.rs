//! Formatted terminal output.
//!
//! Formatting stays here so the fitting code has no printing in it and
//! output changes are localized.

use crate::domain::{FitConfig, Voxel};
use crate::report::{FitSummary, RankedStreamline};

/// Run header plus fit diagnostics.
pub fn format_fit_summary(summary: &FitSummary, config: &FitConfig) -> String {
    let mut out = String::new();

    out.push_str("=== life - fascicle evaluation ===\n");
    out.push_str(&format!(
        "Response: evals={} | sphere={:?}\n",
        fmt_vec(&config.evals),
        config.sphere
    ));
    out.push_str(&format!(
        "Problem: voxels={} | streamlines={} | nnz={}\n",
        summary.n_voxels, summary.n_streamlines, summary.nnz
    ));
    out.push_str(&format!(
        "Solver: iterations={} | termination={} | SSE={:.6e}\n",
        summary.iterations,
        summary.termination.label(),
        summary.sse
    ));
    out.push_str(&format!(
        "RMSE per voxel: mean={:.4} max={:.4}\n",
        summary.mean_rmse, summary.max_rmse
    ));

    match &summary.weights {
        Some(w) => out.push_str(&format!(
            "Weights: min={:.6} median={:.6} max={:.6} mean={:.6} | nonzero={} pruned={}\n",
            w.min, w.median, w.max, w.mean, w.n_nonzero, summary.n_pruned
        )),
        None => out.push_str("Weights: (none)\n"),
    }

    out
}

/// Table of the heaviest streamlines.
pub fn format_top_weights(rows: &[RankedStreamline]) -> String {
    let mut out = String::new();
    out.push_str("Top streamlines by weight:\n");
    out.push_str(&format!("{:>10} {:>14} {:>8}", "streamline", "weight", "nodes"));
    out.push('\n');
    out.push_str(&format!("{:-<10} {:-<14} {:-<8}", "", "", ""));
    out.push('\n');
    for r in rows {
        out.push_str(&format!("{:>10} {:>14.6} {:>8}", r.index, r.weight, r.n_nodes));
        out.push('\n');
    }
    out
}

/// Estimated vs. known weights (phantom runs).
pub fn format_truth_comparison(estimated: &[f64], truth: &[f64]) -> String {
    let n = estimated.len().min(truth.len());
    if n == 0 {
        return "Truth: (no streamlines)\n".to_string();
    }
    let max_abs = estimated
        .iter()
        .zip(truth)
        .map(|(e, t)| (e - t).abs())
        .fold(0.0, f64::max);
    let mean_rel = estimated
        .iter()
        .zip(truth)
        .map(|(e, t)| if *t != 0.0 { ((e - t) / t).abs() } else { e.abs() })
        .sum::<f64>()
        / n as f64;
    format!("Truth: max |w - w_true|={max_abs:.6} | mean relative error={mean_rel:.4}\n")
}

/// Per-voxel RMSE of a prediction against observed data, worst voxels first.
pub fn format_rmse_table(voxels: &[Voxel], rmse: &[f64], top_n: usize) -> String {
    let mut order: Vec<usize> = (0..voxels.len().min(rmse.len())).collect();
    order.sort_by(|a, b| rmse[*b].total_cmp(&rmse[*a]).then(a.cmp(b)));

    let mut out = String::new();
    let mean = if order.is_empty() {
        0.0
    } else {
        order.iter().map(|&i| rmse[i]).sum::<f64>() / order.len() as f64
    };
    out.push_str(&format!("Prediction RMSE: voxels={} mean={mean:.4}\n", order.len()));
    out.push_str(&format!("{:>16} {:>12}", "voxel", "rmse"));
    out.push('\n');
    out.push_str(&format!("{:-<16} {:-<12}", "", ""));
    out.push('\n');
    for &i in order.iter().take(top_n) {
        let [x, y, z] = voxels[i];
        out.push_str(&format!("{:>16} {:>12.4}", format!("({x},{y},{z})"), rmse[i]));
        out.push('\n');
    }
    out
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{weight_stats, FitSummary};
    use crate::solve::Termination;

    fn summary() -> FitSummary {
        FitSummary {
            n_voxels: 64,
            n_streamlines: 8,
            nnz: 2048,
            iterations: 120,
            termination: Termination::Converged,
            sse: 1.5e-3,
            mean_rmse: 0.25,
            max_rmse: 0.75,
            weights: weight_stats(&[0.0, 0.5, 1.0]),
            n_pruned: 1,
        }
    }

    #[test]
    fn summary_mentions_key_numbers() {
        let text = format_fit_summary(&summary(), &FitConfig::default());
        assert!(text.contains("voxels=64"));
        assert!(text.contains("streamlines=8"));
        assert!(text.contains("termination=converged"));
        assert!(text.contains("pruned=1"));
        assert!(text.contains("median=0.500000"));
    }

    #[test]
    fn top_weights_table_has_one_line_per_row() {
        let rows = [
            RankedStreamline { index: 3, weight: 0.9, n_nodes: 18 },
            RankedStreamline { index: 0, weight: 0.1, n_nodes: 18 },
        ];
        let text = format_top_weights(&rows);
        assert_eq!(text.lines().count(), 3 + rows.len());
        assert!(text.lines().nth(3).unwrap().trim_start().starts_with('3'));
    }

    #[test]
    fn rmse_table_lists_worst_first() {
        let voxels = [[0, 0, 0], [1, 0, 0], [2, 0, 0]];
        let text = format_rmse_table(&voxels, &[0.1, 0.5, 0.2], 2);
        let rows: Vec<&str> = text.lines().skip(3).collect();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].contains("(1,0,0)"));
        assert!(rows[1].contains("(2,0,0)"));
    }

    #[test]
    fn truth_comparison_exact_match() {
        let text = format_truth_comparison(&[0.5, 0.25], &[0.5, 0.25]);
        assert!(text.contains("max |w - w_true|=0.000000"));
    }
}
