mod args;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use axiomkit_io_dup::{
    DuplicateError, DuplicateOutcome, Duplicator, PatternCodec, PostProcess, ProgressState,
    RenameText, TokenCodec, UnityGuidCodec,
};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use crate::args::{Args, CodecKind, get_log_level_from_verbose};

const N_EXIT_FAILURE: u8 = 1;
const N_EXIT_CANCELLED: u8 = 130;

fn build_codec(args: &Args) -> Result<Arc<dyn TokenCodec>, DuplicateError> {
    match args.codec {
        CodecKind::Unity => Ok(Arc::new(UnityGuidCodec::new()?)),
        CodecKind::Pattern => {
            let pattern = args.pattern.as_deref().ok_or_else(|| {
                DuplicateError::InvalidPattern("`--pattern` is required with `--codec pattern`".to_string())
            })?;
            let patterns_include =
                (!args.patterns_include.is_empty()).then_some(args.patterns_include.as_slice());
            Ok(Arc::new(PatternCodec::new(pattern, patterns_include)?))
        }
    }
}

fn print_progress(state: ProgressState) {
    let mut stderr = std::io::stderr().lock();
    let _ = write!(
        stderr,
        "\rDuplicating {}/{} ({:.0}%)",
        state.completed,
        state.total,
        state.ratio() * 100.0
    );
    if state.completed == state.total {
        let _ = writeln!(stderr);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(get_log_level_from_verbose(args.verbose))
        .init();

    // Validate the rename step before anything is written.
    let rename = match args.rename.as_ref() {
        Some((text_old, text_new)) => match RenameText::new(text_old, text_new, None) {
            Ok(rename) => Some(rename),
            Err(e) => {
                eprintln!("Error: {e}");
                return ExitCode::from(N_EXIT_FAILURE);
            }
        },
        None => None,
    };
    let codec = match build_codec(&args) {
        Ok(codec) => codec,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(N_EXIT_FAILURE);
        }
    };

    let token = CancellationToken::new();
    let token_signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupt received; cancelling after the current units");
            token_signal.cancel();
        }
    });

    let outcome = Duplicator::new(&args.source, &args.destination, codec)
        .with_options(args.to_options())
        .with_cancellation(token)
        .with_progress(print_progress)
        .run_async()
        .await;

    match outcome {
        DuplicateOutcome::Completed(report) => {
            println!("{report}");
            if let Some(rename) = rename {
                match rename.apply(&args.destination) {
                    Ok(report_rename) => println!("{report_rename}"),
                    Err(e) => {
                        eprintln!("Error: {} failed: {e}", rename.name());
                        return ExitCode::from(N_EXIT_FAILURE);
                    }
                }
            }
            ExitCode::SUCCESS
        }
        DuplicateOutcome::Cancelled(report) => {
            eprintln!();
            eprintln!("Cancelled; destination left partial: {report}");
            ExitCode::from(N_EXIT_CANCELLED)
        }
        DuplicateOutcome::Failed { error, report } => {
            eprintln!();
            eprintln!("Error: {error}");
            eprintln!("{report}");
            ExitCode::from(N_EXIT_FAILURE)
        }
    }
}
