use colored::Colorize;
use infraflow_core::InfrastructureConfig;
use std::path::Path;

pub async fn validate(file: &Path) -> anyhow::Result<()> {
    println!("{}", "Validating configuration...".blue());

    let config = InfrastructureConfig::load(file).await?;
    if let Err(e) = config.validate() {
        println!("{} {}", "✗".red().bold(), e);
        return Err(e.into());
    }

    println!("{}", "✓ Configuration is valid".green().bold());
    println!();
    match config.external_vpc_id() {
        Some(id) => println!("  VPC: {} (existing)", id.cyan()),
        None => println!(
            "  VPC: {}",
            config.networks.vpc.cidr.as_deref().unwrap_or_default().cyan()
        ),
    }
    let nat = if config.manages_nat_gateway() {
        format!("managed ({})", config.nat_gateway_spec())
    } else {
        "existing".to_string()
    };
    println!("  NAT gateway: {}", nat);
    println!("  Zones: {}", config.networks.zones.len());
    for zone in &config.networks.zones {
        let eip = zone.external_eip().unwrap_or("managed");
        println!("    - {} ({}, elastic IP: {})", zone.name.cyan(), zone.workers, eip);
    }
    Ok(())
}
