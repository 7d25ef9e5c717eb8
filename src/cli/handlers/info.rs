//! Information display handlers (stats, delegators, summaries, status, config)

use crate::config::parse_address;
use crate::sync::RunState;
use crate::AppConfig;
use crate::GovSync;
use crate::Result;

/// Print per-token statistics
///
/// # Errors
/// Store read failures
pub async fn handle_stats_command(govsync: &GovSync, json: bool) -> Result<()> {
    let stats = govsync.compute_stats().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("📊 Delegations to {:#x}", stats.delegatee);
    println!("   Active delegators: {}", stats.total_active_delegators);
    println!();
    for (symbol, token) in &stats.token_stats {
        let last_block = stats.last_analyzed_blocks.get(symbol).copied().unwrap_or(0);
        println!("🪙 {symbol} (last analyzed block {last_block})");
        println!("   Delegators:             {}", token.delegators);
        println!("   Delegated balance:      {}", token.total_balance);
        println!(
            "   Voting / proposition:   {} / {} records",
            token.voting_power_delegators, token.proposition_power_delegators
        );
        println!(
            "   Delegatee power:        {} voting, {} proposition",
            token.delegatee_voting_power, token.delegatee_proposition_power
        );
    }
    Ok(())
}

/// Print the delegator directory
///
/// # Errors
/// Store read failures
pub async fn handle_delegators_command(govsync: &GovSync, limit: usize) -> Result<()> {
    let directory = govsync.delegator_directory(limit).await?;

    println!(
        "👥 Showing {} of {} delegators",
        directory.delegators.len(),
        directory.total
    );
    for (rank, listing) in directory.delegators.iter().enumerate() {
        let tokens: Vec<String> = listing
            .delegations_by_token
            .iter()
            .map(|(symbol, d)| {
                let kind = match (d.voting, d.proposition) {
                    (true, true) => "V+P",
                    (true, false) => "V",
                    (false, true) => "P",
                    (false, false) => "-",
                };
                format!("{symbol}:{kind}")
            })
            .collect();
        println!(
            "{:>4}. {:#x} {:>24} [{}]",
            rank + 1,
            listing.address,
            listing.total_votes,
            tokens.join(", ")
        );
    }
    if directory.has_more {
        println!("… use --limit to see more");
    }
    Ok(())
}

/// Print one delegator's summary
///
/// # Errors
/// Returns `InvalidAddress` for a malformed address
pub async fn handle_summary_command(govsync: &GovSync, address: &str) -> Result<()> {
    let delegator = parse_address(address)?;
    match govsync.delegator_summary(delegator).await? {
        Some(summary) => println!("{}", serde_json::to_string_pretty(&summary)?),
        None => println!("❌ {delegator:#x} has no live delegations to the target"),
    }
    Ok(())
}

/// Print cursors and run state
///
/// # Errors
/// Store read failures
pub async fn handle_status_command(govsync: &GovSync) -> Result<()> {
    let status = govsync.sync_status().await?;

    match status.run_state {
        RunState::Idle => println!("💤 Idle"),
        RunState::Running { started_at } => println!("🏃 Running since {started_at}"),
    }
    match status.global_cursor {
        Some(block) => println!("Global cursor: {block}"),
        None => println!("Global cursor: not set"),
    }
    for token in &status.tokens {
        let cursor = token
            .cursor
            .map_or_else(|| "not set".to_string(), |b| b.to_string());
        println!(
            "  {:<10} {:#x} genesis {:>10} cursor {}",
            token.symbol, token.address, token.genesis_block, cursor
        );
    }
    if status.failed_ranges.is_empty() {
        println!("No failed ranges pending");
    } else {
        println!("⚠️  {} failed range(s) pending:", status.failed_ranges.len());
        for range in &status.failed_ranges {
            println!(
                "  {:#x} [{}, {}]",
                range.token, range.from_block, range.to_block
            );
        }
    }
    Ok(())
}

/// Print the effective configuration; needs neither Redis nor RPC
///
/// # Errors
/// Returns an error if the configuration is invalid
pub fn handle_config_command(config: &AppConfig) -> Result<()> {
    println!("📋 govsync configuration");
    println!("  Delegatee:        {}", config.chain.delegatee);
    println!("  RPC endpoints:    {}", config.rpc_urls().len());
    println!("  Chunk size:       {}", config.chunk_size());
    println!("  Redis namespace:  {}", config.redis.namespace);
    match config.sync.bootstrap_block {
        Some(block) => println!("  Bootstrap block:  {block}"),
        None => println!("  Bootstrap block:  token genesis"),
    }
    println!(
        "  Retry:            {} attempts, {:?} base delay",
        config.sync.retry_max_attempts,
        config.retry_base_delay()
    );
    println!(
        "  Failed ranges:    {}",
        if config.sync.retry_failed_ranges {
            "retried"
        } else {
            "dropped"
        }
    );
    println!("  Tokens:");
    for token in config.token_descriptors()? {
        println!(
            "    {:<10} {:#x} genesis {:>10} nonce {}()",
            token.symbol,
            token.address,
            token.genesis_block,
            token.nonce_method()
        );
    }
    config.validate()?;
    println!("✅ Configuration is valid");
    Ok(())
}
