use std::env;
use std::fs::{self, File};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use memmap2::Mmap;
use serde_json::json;

use infer_bridge::{BridgeConfig, Session};

struct Args {
    model: String,
    runs: usize,
    config: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = env::args().skip(1);
    let mut model = None;
    let mut runs = 1usize;
    let mut config = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--runs" => {
                let value = args.next().ok_or_else(|| anyhow!("--runs needs a value"))?;
                runs = value.parse().with_context(|| format!("parse --runs {}", value))?;
            }
            "--config" => {
                config = Some(args.next().ok_or_else(|| anyhow!("--config needs a path"))?);
            }
            other if model.is_none() => model = Some(other.to_string()),
            other => return Err(anyhow!("unexpected argument {}", other)),
        }
    }
    let model = model.ok_or_else(|| {
        anyhow!("usage: infer-probe <model.ibgf> [--runs N] [--config config.json]")
    })?;
    Ok(Args { model, runs, config })
}

fn run(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("read {}", path))?;
            BridgeConfig::from_json(&text)?
        }
        None => BridgeConfig::from_env(),
    };
    let mut session = Session::from_config(config)?;

    let file = File::open(&args.model).with_context(|| format!("open {}", args.model))?;
    let mmap = unsafe { Mmap::map(&file).with_context(|| "mmap model file")? };
    session.load_bytes(&mmap[..])?;

    let generation = session
        .generation()
        .ok_or_else(|| anyhow!("session not ready after load"))?;
    session.input_mut(generation)?.fill(0.0);
    for _ in 0..args.runs {
        session.invoke()?;
    }

    let output = session.output(generation)?;
    let non_finite = output.iter().filter(|v| !v.is_finite()).count();
    let report = json!({
        "model": args.model,
        "summary": session.summary(),
        "stats": session.stats(),
        "non_finite_outputs": non_finite,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> ExitCode {
    let result = parse_args().and_then(|args| run(&args));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            infer_bridge::critical!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
