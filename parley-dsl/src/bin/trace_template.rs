/// Template Tracer - Shows the flow through Source → AST → Conversation
///
/// Usage: cargo run --bin trace_template <template-file> [parameters.json]

use parley_core::parameters_from_json;
use parley_dsl::{parse, Chain};
use std::fs;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: cargo run --bin trace_template <template-file> [parameters.json]");
        eprintln!();
        eprintln!("Example:");
        eprintln!("  cargo run --bin trace_template prompts/greeting.parley params.json");
        std::process::exit(1);
    }

    let template_path = &args[1];

    println!("╔═══════════════════════════════════════════════════════════════");
    println!("║ PARLEY TEMPLATE TRACER");
    println!("╚═══════════════════════════════════════════════════════════════\n");

    let content = match fs::read_to_string(template_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ Failed to read {}: {}", template_path, e);
            std::process::exit(1);
        }
    };

    let parameters = match args.get(2) {
        Some(path) => {
            let json = fs::read_to_string(path)
                .map_err(|e| e.to_string())
                .and_then(|raw| serde_json::from_str(&raw).map_err(|e| e.to_string()));
            match json {
                Ok(json) => parameters_from_json(json),
                Err(e) => {
                    eprintln!("❌ Failed to load parameters from {}: {}", path, e);
                    std::process::exit(1);
                }
            }
        }
        None => Default::default(),
    };

    println!("📝 INPUT TEMPLATE:");
    println!("{}", content);
    println!();

    // Step 1: Parse template → Fragment
    println!("🌳 AST:");
    println!("─────────────────────────────────────────────────────────────");
    match parse(&content) {
        Ok(fragment) => println!("{:#?}", fragment),
        Err(e) => {
            println!("❌ Parse error: {}", e);
            return;
        }
    }
    println!();

    // Step 2: Compile the first step
    println!("💬 CONVERSATION (first step):");
    println!("─────────────────────────────────────────────────────────────");
    let mut chain = match Chain::new(&content, parameters) {
        Ok(chain) => chain,
        Err(e) => {
            println!("❌ Parse error: {}", e);
            return;
        }
    };
    match chain.step(None) {
        Ok(step) => {
            match serde_json::to_string_pretty(&step.conversation) {
                Ok(json) => println!("{}", json),
                Err(e) => println!("❌ Failed to serialize conversation: {}", e),
            }
            println!();
            if step.completed {
                println!("✅ Compiled in a single step");
            } else {
                println!("⏸  Suspended at a step; the chain expects a response");
            }
        }
        Err(e) => println!("❌ Compile error: {}", e),
    }
}
