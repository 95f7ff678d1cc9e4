//! Evaluate and sweep command implementations.

use crate::cli::preflight::{self, Operation};
use crate::cli::{EvaluateTarget, Output};
use crate::config::Settings;
use crate::evaluation::CancellationFlag;
use crate::pipeline::Pipeline;
use crate::retrieval::SearchMethod;
use crate::rewrite::RewriteStrategy;
use crate::store::GroundTruthQuestion;
use anyhow::Result;

/// Flag that trips on the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationFlag {
    let cancel = CancellationFlag::new();
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            Output::warning("Cancelling after in-flight questions finish...");
            flag.cancel();
        }
    });
    cancel
}

fn load_questions(pipeline: &Pipeline, video: Option<&str>) -> Result<Vec<GroundTruthQuestion>> {
    let questions = pipeline.store().ground_truth(video)?;
    if questions.is_empty() {
        Output::warning("No ground-truth questions found. Run 'tubeqa ground-truth' first.");
    }
    Ok(questions)
}

/// Run the evaluate command.
pub async fn run_evaluate(target: &EvaluateTarget, mut settings: Settings) -> Result<()> {
    preflight::check(&settings, Operation::Evaluate)?;

    match target {
        EvaluateTarget::Retrieval {
            video,
            k,
            strategy,
            method,
        } => {
            if let Some(k) = k {
                settings.retrieval.top_k = (*k).max(1);
                settings.retrieval.context_size = (*k).max(1);
            }
            if let Some(strategy) = strategy {
                settings.retrieval.rewrite_strategy = *strategy;
            }
            if let Some(method) = method {
                settings.retrieval.search_method = *method;
            }

            let pipeline = Pipeline::new(settings)?;
            let questions = load_questions(&pipeline, video.as_deref())?;
            if questions.is_empty() {
                return Ok(());
            }

            let harness = pipeline.evaluation_harness().with_progress(true);
            let record = harness
                .evaluate_retrieval(&questions, &harness.current_config(), video.as_deref(), &cancel_on_ctrl_c())
                .await?;

            Output::header("Retrieval");
            Output::performance(&record);
            Output::kv("Run", &record.run_id);
        }

        EvaluateTarget::Answers { video, limit } => {
            let pipeline = Pipeline::new(settings)?;
            let mut questions = load_questions(&pipeline, video.as_deref())?;
            if let Some(limit) = limit {
                questions.truncate(*limit);
            }
            if questions.is_empty() {
                return Ok(());
            }

            let harness = pipeline.evaluation_harness().with_progress(true);
            let report = harness.evaluate_answers(&questions, &cancel_on_ctrl_c()).await?;

            Output::header("Answer relevance");
            Output::kv("RELEVANT", &report.relevant.to_string());
            Output::kv("PARTLY_RELEVANT", &report.partly_relevant.to_string());
            Output::kv("NON_RELEVANT", &report.non_relevant.to_string());
            if report.skipped > 0 {
                Output::kv("Skipped (unparseable verdict)", &report.skipped.to_string());
            }
            if report.failed > 0 {
                Output::kv("Failed", &report.failed.to_string());
            }
            Output::kv("Run", &report.run_id);
        }
    }

    Ok(())
}

/// Run the sweep command.
pub async fn run_sweep(
    video: Option<&str>,
    k_values: &[usize],
    strategies: &[RewriteStrategy],
    methods: &[SearchMethod],
    settings: Settings,
) -> Result<()> {
    preflight::check(&settings, Operation::Evaluate)?;

    let k_values = if k_values.is_empty() {
        settings.evaluation.sweep_k_values.clone()
    } else {
        k_values.to_vec()
    };
    let strategies = if strategies.is_empty() {
        settings.evaluation.sweep_strategies.clone()
    } else {
        strategies.to_vec()
    };
    let methods = if methods.is_empty() {
        settings.evaluation.sweep_search_methods.clone()
    } else {
        methods.to_vec()
    };

    let pipeline = Pipeline::new(settings)?;
    let questions = load_questions(&pipeline, video)?;
    if questions.is_empty() {
        return Ok(());
    }

    Output::info(&format!(
        "Sweeping {} configurations over {} questions",
        k_values.len() * strategies.len() * methods.len().max(1),
        questions.len()
    ));

    let harness = pipeline.evaluation_harness().with_progress(true);
    let result = harness
        .sweep(&questions, &k_values, &strategies, &methods, video, &cancel_on_ctrl_c())
        .await?;

    Output::header("Configurations");
    for record in &result.records {
        Output::performance(record);
    }

    if let Some(best) = &result.best {
        println!();
        Output::success(&format!("Best: {} (MRR {:.3}, hit rate {:.3})", best.label, best.mrr, best.hit_rate));
    }
    Ok(())
}
