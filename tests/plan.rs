//! End-to-end tests: configuration file to realized outputs
//!
//! These drive the public API the way the binary does: load a YAML file,
//! compile it, and walk the plan with the dry-run realizer.

use std::io::Write;

use magento_platform::compiler::{PlatformCompiler, APPLICATION_UNIT, DATABASE_UNIT, SEARCH_UNIT};
use magento_platform::config::{DeploymentPhase, PlatformConfig, StackLayout};
use magento_platform::plan::{DeploymentPlan, MAGENTO_URL_OUTPUT, SEARCH_HOSTNAME_OUTPUT};
use magento_platform::realize::{deploy, DryRunRealizer};
use magento_platform::resource::ResourceKind;
use magento_platform::Error;

const STAGING_CONFIG: &str = r#"
name: MagentoStaging
layout: nested
network:
  maxAzs: 2
  cidr: 10.20.0.0/16
database:
  instanceClass: db.t3.medium
  multiAz: false
search:
  dataNodes: 2
  zoneAwareness: 2
  accessPolicy:
    type: principals
    principals:
      - arn:aws:iam::123456789012:role/magento-task
application:
  desiredCount: 2
  minCapacity: 2
  maxCapacity: 6
  memoryTargetPercent: null
  listener:
    protocol: https
    certificateArn: arn:aws:acm:us-east-1:123456789012:certificate/abc
    domainName: staging.shop.example.com
    hostedZoneId: Z0123456789
    hostedZoneName: shop.example.com
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn compile_file(file: &tempfile::NamedTempFile) -> DeploymentPlan {
    let config = PlatformConfig::from_file(file.path()).unwrap();
    PlatformCompiler::new().compile(&config).unwrap()
}

/// Every reference in the plan points at a resource earlier in plan order
fn assert_references_point_backwards(plan: &DeploymentPlan) {
    for (i, resource) in plan.resources.iter().enumerate() {
        for reference in resource.references() {
            let producer = plan
                .position(&reference.resource)
                .unwrap_or_else(|| panic!("{} references unknown {}", resource.logical_id, reference));
            assert!(
                producer < i,
                "{} at {} references {} at {}",
                resource.logical_id,
                i,
                reference.resource,
                producer
            );
        }
    }
}

#[test]
fn staging_config_file_compiles_and_realizes() {
    let file = write_config(STAGING_CONFIG);
    let plan = compile_file(&file);

    assert_eq!(plan.name, "MagentoStaging");
    assert_eq!(plan.layout, StackLayout::Nested);
    assert_references_point_backwards(&plan);

    let subnets = plan
        .resources
        .iter()
        .filter(|r| r.kind == ResourceKind::Subnet)
        .count();
    assert_eq!(subnets, 4);

    let policies = plan
        .resources
        .iter()
        .filter(|r| r.kind == ResourceKind::ScalingPolicy)
        .count();
    assert_eq!(policies, 1);

    let deployment = deploy(&plan, &DryRunRealizer::new()).unwrap();
    assert_eq!(
        deployment.outputs[MAGENTO_URL_OUTPUT],
        "https://staging.shop.example.com"
    );
    assert_eq!(
        deployment.outputs[SEARCH_HOSTNAME_OUTPUT],
        "search-magentoesdomain.dry-run.es.amazonaws.com"
    );
}

#[test]
fn nested_units_deploy_in_three_waves() {
    let file = write_config(STAGING_CONFIG);
    let plan = compile_file(&file);

    assert_eq!(plan.waves.len(), 3);
    assert_eq!(plan.wave_of("MagentoStaging"), Some(0));
    assert_eq!(plan.wave_of(DATABASE_UNIT), Some(1));
    assert_eq!(plan.wave_of(SEARCH_UNIT), Some(1));
    assert_eq!(plan.wave_of(APPLICATION_UNIT), Some(2));

    // Nothing flows back from the application into the backends
    for r in &plan.cross_unit_references {
        assert_ne!(r.producer_unit, APPLICATION_UNIT, "{r:?}");
    }
}

#[test]
fn single_layout_file_has_one_unit() {
    let file = write_config("layout: single\n");
    let plan = compile_file(&file);

    assert_eq!(plan.units.len(), 1);
    assert_eq!(plan.waves.len(), 1);
    assert_references_point_backwards(&plan);
    deploy(&plan, &DryRunRealizer::new()).unwrap();
}

#[test]
fn empty_file_uses_defaults() {
    let file = write_config("{}\n");
    let config = PlatformConfig::from_file(file.path()).unwrap();
    assert_eq!(config, PlatformConfig::default());
}

#[test]
fn promotion_round_trips_through_the_file() {
    let file = write_config(STAGING_CONFIG);
    let mut config = PlatformConfig::from_file(file.path()).unwrap();

    config.promote(DeploymentPhase::Bootstrapping).unwrap();
    config.promote(DeploymentPhase::Steady).unwrap();
    std::fs::write(file.path(), config.to_yaml().unwrap()).unwrap();

    let reloaded = PlatformConfig::from_file(file.path()).unwrap();
    assert_eq!(reloaded.phase, DeploymentPhase::Steady);

    let plan = PlatformCompiler::new().compile(&reloaded).unwrap();
    let service = plan.resource("MagentoService").unwrap();
    assert_eq!(
        service.properties["HealthCheckGracePeriodSeconds"].as_i64(),
        Some(300)
    );
    assert_eq!(service.tags["magento:phase"], "steady");
}

#[test]
fn skipping_a_phase_is_rejected() {
    let mut config = PlatformConfig::default();
    let err = config.promote(DeploymentPhase::Steady).unwrap_err();
    assert!(err.is_plan_time());
    assert_eq!(config.phase, DeploymentPhase::FirstBoot);
}

#[test]
fn invalid_file_is_a_validation_error() {
    let file = write_config("application:\n  minCapacity: 5\n  maxCapacity: 2\n");
    let config = PlatformConfig::from_file(file.path()).unwrap();
    let err = PlatformCompiler::new().compile(&config).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err}");
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PlatformConfig::from_file(&dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, Error::Config(_)), "{err}");
}
