use crate::catalog::Catalog;
use crate::decoder::decode;
use crate::scanner::{self, Limits};
use crate::schema::{SchemaDevice, assemble, describe};
use crate::source::RegisterSource;
use crate::sunspec::{AddressClass, RegisterAddress};
use tracing::{debug, info};

#[derive(Clone, Debug)]
pub struct Options {
    /// Address class to look for the marker in when `base` is not given.
    pub class: AddressClass,
    /// Where the marker is. Probed for among the standard base addresses when `None`.
    pub base: Option<RegisterAddress>,
    /// Derived from the Common model when empty.
    pub description: String,
    pub limits: Limits,
    /// Leave models the catalog does not know out of the schema.
    pub skip_unknown: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            class: AddressClass::Holding,
            base: None,
            description: String::new(),
            limits: Limits::default(),
            skip_unknown: false,
        }
    }
}

/// Run one discovery pass over `source` and close it afterwards, whatever the outcome.
pub async fn discover<S: RegisterSource>(
    source: &mut S,
    catalog: &Catalog,
    options: &Options,
) -> Result<SchemaDevice, scanner::Error> {
    let result = discover_open(source, catalog, options).await;
    source.close().await;
    result
}

async fn discover_open<S: RegisterSource>(
    source: &mut S,
    catalog: &Catalog,
    options: &Options,
) -> Result<SchemaDevice, scanner::Error> {
    let base = match options.base {
        Some(base) => base,
        None => scanner::locate(source, options.class).await?,
    };
    let blocks = scanner::scan(source, base, &options.limits).await?;
    let mut models = Vec::with_capacity(blocks.len());
    for block in &blocks {
        let model = decode(block, catalog);
        if !model.is_known() && options.skip_unknown {
            debug!(message = "skipping unknown model", model = model.id, address = %model.address);
            continue;
        }
        info!(
            message = "decoded model",
            model = model.id,
            label = model.label.as_deref().unwrap_or("unknown"),
            points = model.points.len(),
        );
        models.push(model);
    }
    let description = if options.description.is_empty() {
        describe(base, &models)
    } else {
        options.description.clone()
    };
    Ok(assemble(description, base, models))
}
