//! Resource accounting for pods and nodes, in the units the scheduler compares them in:
//! millicores for cpu and bytes for memory.
use crate::constants::{RESOURCE_CPU, RESOURCE_MEMORY, RESOURCE_PODS};

use k8s_openapi::api::core::v1::{Container, Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use lazy_static::lazy_static;
use regex::Regex;
use snafu::{OptionExt, ResultExt};

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

lazy_static! {
    // A number, optionally followed by a binary suffix, a decimal suffix or a decimal exponent.
    static ref QUANTITY_RE: Regex =
        Regex::new(r"^([+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+))(Ki|Mi|Gi|Ti|Pi|Ei|[numkMGTPE]|[eE][+-]?[0-9]+)?$")
            .expect("Invalid regex literal.");
}

pub type Result<T> = std::result::Result<T, error::Error>;

/// Parses a Kubernetes quantity string into its numeric value in base units.
pub fn parse_quantity(quantity: &Quantity) -> Result<f64> {
    let value = quantity.0.trim();
    let captures = QUANTITY_RE
        .captures(value)
        .context(error::InvalidQuantitySnafu { value })?;
    let number: f64 = captures[1]
        .parse()
        .context(error::ParseNumberSnafu { value })?;
    let multiplier = match captures.get(2).map(|suffix| suffix.as_str()) {
        None => 1.0,
        Some("Ki") => 1024f64,
        Some("Mi") => 1024f64.powi(2),
        Some("Gi") => 1024f64.powi(3),
        Some("Ti") => 1024f64.powi(4),
        Some("Pi") => 1024f64.powi(5),
        Some("Ei") => 1024f64.powi(6),
        Some("n") => 1e-9,
        Some("u") => 1e-6,
        Some("m") => 1e-3,
        Some("k") => 1e3,
        Some("M") => 1e6,
        Some("G") => 1e9,
        Some("T") => 1e12,
        Some("P") => 1e15,
        Some("E") => 1e18,
        Some(exponent) => {
            let exponent: i32 = exponent[1..]
                .parse()
                .context(error::ParseExponentSnafu { value })?;
            10f64.powi(exponent)
        }
    };
    Ok(number * multiplier)
}

/// Cpu and memory amounts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Resources {
    pub milli_cpu: i64,
    pub memory: i64,
}

/// Sums saturate at `i64::MAX`. Use `checked_add` where an overflow must not pass as a fit.
impl Add for Resources {
    type Output = Resources;

    fn add(self, other: Resources) -> Resources {
        Resources {
            milli_cpu: self.milli_cpu.saturating_add(other.milli_cpu),
            memory: self.memory.saturating_add(other.memory),
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, other: Resources) {
        *self = *self + other;
    }
}

impl Resources {
    /// Returns `None` if either amount overflows.
    pub fn checked_add(self, other: Resources) -> Option<Resources> {
        Some(Resources {
            milli_cpu: self.milli_cpu.checked_add(other.milli_cpu)?,
            memory: self.memory.checked_add(other.memory)?,
        })
    }

    fn from_list(list: Option<&BTreeMap<String, Quantity>>) -> Result<Self> {
        let Some(list) = list else {
            return Ok(Resources::default());
        };
        let milli_cpu = list
            .get(RESOURCE_CPU)
            .map(|cpu| parse_quantity(cpu).map(|cores| (cores * 1000.0).ceil() as i64))
            .transpose()?
            .unwrap_or(0);
        let memory = list
            .get(RESOURCE_MEMORY)
            .map(|memory| parse_quantity(memory).map(|bytes| bytes.ceil() as i64))
            .transpose()?
            .unwrap_or(0);
        Ok(Resources { milli_cpu, memory })
    }

    fn max(self, other: Resources) -> Resources {
        Resources {
            milli_cpu: self.milli_cpu.max(other.milli_cpu),
            memory: self.memory.max(other.memory),
        }
    }
}

fn container_requests(container: &Container) -> Result<Resources> {
    Resources::from_list(
        container
            .resources
            .as_ref()
            .and_then(|resources| resources.requests.as_ref()),
    )
}

/// The resources a pod asks the scheduler for: the sum of its containers' requests, or the largest
/// init container request if that is greater.
pub fn pod_requests(pod: &Pod) -> Result<Resources> {
    let Some(spec) = pod.spec.as_ref() else {
        return Ok(Resources::default());
    };

    let mut total = Resources::default();
    for container in &spec.containers {
        total += container_requests(container)?;
    }
    for init_container in spec.init_containers.iter().flatten() {
        total = total.max(container_requests(init_container)?);
    }
    Ok(total)
}

/// What a node offers to pods: its allocatable resources, or its capacity if allocatable is not
/// reported.
pub fn node_allocatable(node: &Node) -> Result<Resources> {
    let status = node.status.as_ref();
    let list = status
        .and_then(|status| status.allocatable.as_ref())
        .or_else(|| status.and_then(|status| status.capacity.as_ref()));
    Resources::from_list(list)
}

/// The maximum number of pods the node accepts, if it reports one.
pub fn node_pod_capacity(node: &Node) -> Result<Option<i64>> {
    let status = node.status.as_ref();
    status
        .and_then(|status| status.allocatable.as_ref())
        .or_else(|| status.and_then(|status| status.capacity.as_ref()))
        .and_then(|list| list.get(RESOURCE_PODS))
        .map(|pods| parse_quantity(pods).map(|count| count as i64))
        .transpose()
}

pub mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display("'{}' is not a valid resource quantity", value))]
        InvalidQuantity { value: String },

        #[snafu(display("Unable to parse number in quantity '{}': '{}'", value, source))]
        ParseNumber {
            value: String,
            source: std::num::ParseFloatError,
        },

        #[snafu(display("Unable to parse exponent in quantity '{}': '{}'", value, source))]
        ParseExponent {
            value: String,
            source: std::num::ParseIntError,
        },
    }
}
