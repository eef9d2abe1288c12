//! Order plugins split a target into one or more certificate requests.

use crate::{
    core::types::{Order, Renewal, Target, TargetPart},
    plugins::{OrderPlugin, Plugin},
    storage::files::safe_file_name,
};

/// One certificate covering every identifier of the target.
#[derive(Debug, Default)]
pub struct SingleOrder;

impl Plugin for SingleOrder {
    fn id(&self) -> &str {
        "single"
    }

    fn name(&self) -> &str {
        "Single"
    }
}

impl OrderPlugin for SingleOrder {
    fn split(&self, renewal: &Renewal, target: &Target) -> Vec<Order> {
        vec![Order::new(renewal, target.clone(), None, None)]
    }
}

/// One certificate per identifier.
#[derive(Debug, Default)]
pub struct HostOrder;

impl Plugin for HostOrder {
    fn id(&self) -> &str {
        "host"
    }

    fn name(&self) -> &str {
        "Host"
    }
}

impl OrderPlugin for HostOrder {
    fn split(&self, renewal: &Renewal, target: &Target) -> Vec<Order> {
        target
            .identifiers()
            .into_iter()
            .map(|identifier| {
                let mut part = TargetPart::new(vec![identifier.clone()]);
                part.label = target
                    .parts
                    .iter()
                    .find(|p| p.identifiers.contains(&identifier))
                    .and_then(|p| p.label.clone());
                let mut slice = Target::new(
                    target.friendly_name.clone(),
                    Some(identifier.clone()),
                    vec![part],
                );
                slice.user_private_key = target.user_private_key.clone();
                Order::new(
                    renewal,
                    slice,
                    Some(identifier.display_value()),
                    Some(safe_file_name(&identifier.value())),
                )
            })
            .collect()
    }
}
