//! env-tagging: label every instance with its environment.
//!
//! Instances in `us-east-1` get `environment=prod`, instances in `eu-west-3`
//! get `environment=dev`. Each region is one tagging call covering all of
//! its instances.

use aws_ec2::Ec2Compute;
use domain::service::tagging::tag_instances;
use domain::Tag;
use ops_common::{init_tracing, print_report, LogFormat, ProcessEnv};
use tracing::{error, info};

/// Region and the `environment` tag value its instances receive.
const REGION_ENVIRONMENTS: [(&str, &str); 2] = [("us-east-1", "prod"), ("eu-west-3", "dev")];

fn main() {
    init_tracing(LogFormat::from_env(&ProcessEnv));
    if let Err(e) = run() {
        error!(error = %e, "environment tagging failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    for (region, environment) in REGION_ENVIRONMENTS {
        let api = Ec2Compute::for_region(region).map_err(|e| format!("ec2 init error: {e}"))?;
        let tag = Tag::new("environment", environment);
        let report = tag_instances(&api, &tag).map_err(|e| format!("{region}: {e}"))?;
        info!(region, environment, tagged = report.tagged.len(), "instances tagged");
        print_report(&report)?;
    }
    Ok(())
}
