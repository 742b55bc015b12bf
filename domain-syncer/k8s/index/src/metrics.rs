use crate::{SharedDomains, SharedNamespaces};
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{gauge::ConstGauge, MetricType},
    registry::Registry,
};

#[derive(Debug)]
struct Instrumented {
    domains: SharedDomains,
    namespaces: SharedNamespaces,
}

pub fn register(reg: &mut Registry, domains: SharedDomains, namespaces: SharedNamespaces) {
    reg.register_collector(Box::new(Instrumented {
        domains,
        namespaces,
    }));
}

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let (domains, trust_targets) = {
            let index = self.domains.read();
            (index.len(), index.live_trust_targets())
        };
        let namespaces = self.namespaces.read().len();

        let mut size_encoder = encoder.encode_descriptor(
            "index_size",
            "The number of entries in each index",
            None,
            MetricType::Gauge,
        )?;
        for (kind, size) in [
            ("domains", domains),
            ("trust_targets", trust_targets),
            ("namespaces", namespaces),
        ] {
            let labels = vec![("kind", kind)];
            let gauge = ConstGauge::new(size as u32);
            gauge.encode(size_encoder.encode_family(&labels)?)?;
        }

        Ok(())
    }
}
