use std::path::Path;

use crate::catalog::{self, Catalog};

/// The built-in catalog, extended by the SunSpec JSON models in `models_dir`.
fn load_catalog(models_dir: Option<&Path>) -> Result<Catalog, catalog::Error> {
    let mut catalog = Catalog::builtin();
    if let Some(directory) = models_dir {
        let loaded = catalog.load_dir(directory)?;
        tracing::info!(message = "loaded model definitions", loaded, ?directory);
    }
    Ok(catalog)
}

pub mod models {
    use std::path::PathBuf;

    use crate::catalog::{self, GroupCount, GroupDefinition, ModelDefinition, TypeKind};
    use crate::output::{self, Record};

    /// Search and output the SunSpec models this tool can decode.
    #[derive(clap::Parser)]
    pub struct Args {
        /// Only list models whose id or label contain this.
        filter: Option<String>,
        /// List the points of each model instead of the models.
        #[arg(long)]
        points: bool,
        /// Directory with additional SunSpec model definitions (`model_<id>.json`).
        #[arg(long)]
        models_dir: Option<PathBuf>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not load the model catalog")]
        LoadCatalog(#[source] catalog::Error),
        #[error("could not output the models")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct ModelSchema<'a> {
        pub id: u16,
        pub label: &'a str,
        /// Fixed part of the model, without repeating groups.
        pub length: u32,
        pub repeating: Option<&'a str>,
        pub description: Option<&'a str>,
    }

    impl<'a> ModelSchema<'a> {
        fn new(model: &'a ModelDefinition) -> Self {
            let repeating = model
                .group
                .groups
                .iter()
                .find(|g| !matches!(g.count, GroupCount::Once))
                .map(|g| g.name.as_str());
            Self {
                id: model.id,
                label: &model.label,
                length: model.group.static_words(),
                repeating,
                description: model.description.as_deref(),
            }
        }
    }

    impl Record for ModelSchema<'_> {
        const HEADERS: &'static [&'static str] =
            &["ID", "Label", "Length", "Repeating", "Description"];

        fn cells(&self) -> Vec<String> {
            vec![
                self.id.to_string(),
                self.label.to_string(),
                self.length.to_string(),
                self.repeating.unwrap_or_default().to_string(),
                self.description.unwrap_or_default().to_string(),
            ]
        }
    }

    #[derive(serde::Serialize)]
    pub struct PointSchema {
        pub model: u16,
        /// Repeated points are named with the `<index>` placeholder.
        pub name: String,
        #[serde(rename = "type")]
        pub kind: TypeKind,
        pub offset: u32,
        pub words: u16,
        pub scale_factor: Option<String>,
        pub units: Option<String>,
        pub label: Option<String>,
    }

    impl Record for PointSchema {
        const HEADERS: &'static [&'static str] =
            &["Model", "Offset", "Name", "Type", "Words", "Scale", "Units", "Label"];

        fn cells(&self) -> Vec<String> {
            vec![
                self.model.to_string(),
                self.offset.to_string(),
                self.name.clone(),
                self.kind.to_string(),
                self.words.to_string(),
                self.scale_factor.clone().unwrap_or_default(),
                self.units.clone().unwrap_or_default(),
                self.label.clone().unwrap_or_default(),
            ]
        }
    }

    /// One instance of every group, with repetition indices left as a placeholder.
    fn points_of(
        model: u16,
        group: &GroupDefinition,
        prefix: &str,
        offset: &mut u32,
        rows: &mut Vec<PointSchema>,
    ) {
        for point in &group.points {
            rows.push(PointSchema {
                model,
                name: format!("{prefix}{}", point.name),
                kind: point.kind,
                offset: *offset,
                words: point.words,
                scale_factor: point.scale_factor.as_ref().map(|sf| sf.to_string()),
                units: point.units.clone(),
                label: point.label.clone(),
            });
            *offset += u32::from(point.words);
        }
        for sub_group in &group.groups {
            let name = catalog::capitalized(&sub_group.name);
            let prefix = match sub_group.count {
                GroupCount::Once => format!("{prefix}{name}_"),
                _ => format!("{prefix}{name}_<index>_"),
            };
            points_of(model, sub_group, &prefix, offset, rows);
        }
    }

    fn is_match(model: &ModelDefinition, pattern: &str) -> bool {
        let pattern = pattern.to_uppercase();
        model.id.to_string().contains(&pattern) || model.label.to_uppercase().contains(&pattern)
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let catalog = super::load_catalog(args.models_dir.as_deref()).map_err(Error::LoadCatalog)?;
        let models = catalog
            .models()
            .filter(|m| args.filter.as_ref().is_none_or(|pattern| is_match(m, pattern)))
            .collect::<Vec<_>>();
        if args.points {
            let mut output = args.output.to_output::<PointSchema>().map_err(Error::Output)?;
            for model in models {
                let mut rows = Vec::new();
                points_of(model.id, &model.group, "", &mut 0, &mut rows);
                for row in &rows {
                    output.write(row).map_err(Error::Output)?;
                }
            }
            output.commit().map_err(Error::Output)
        } else {
            let mut output = args.output.to_output::<ModelSchema>().map_err(Error::Output)?;
            for model in models {
                output.write(&ModelSchema::new(model)).map_err(Error::Output)?;
            }
            output.commit().map_err(Error::Output)
        }
    }

}

pub mod discover {
    use std::path::PathBuf;

    use crate::catalog;
    use crate::connection;
    use crate::discovery::{self, Options};
    use crate::output::{self, Record};
    use crate::scanner::{self, Limits};
    use crate::schema::{DecodedPoint, SchemaDevice};
    use crate::source::Recording;
    use crate::sunspec::{AddressClass, RegisterAddress};

    /// Discover the SunSpec models of a device and decode their points.
    #[derive(clap::Parser)]
    pub struct Args {
        #[clap(flatten)]
        connection: connection::Args,
        /// The register space the model chain is in.
        #[arg(long, value_enum, default_value_t = AddressClass::Holding)]
        address_class: AddressClass,
        /// Where the `SunS` marker is. Probed for among 0, 40000 and 50000 if not given.
        #[arg(long)]
        base_address: Option<u16>,
        /// Description of the device for the schema. Derived from the Common model if empty.
        #[arg(long, default_value = "")]
        description: String,
        /// Give up on devices with more models than this.
        #[arg(long, default_value_t = Limits::default().max_models)]
        max_models: usize,
        /// Leave models without a known definition out of the schema.
        #[arg(long)]
        skip_unknown: bool,
        /// Directory with additional SunSpec model definitions (`model_<id>.json`).
        #[arg(long)]
        models_dir: Option<PathBuf>,
        /// Write the complete schema as JSON to this file.
        #[arg(long)]
        schema: Option<PathBuf>,
        /// Write every register read during discovery to this file, in the recording format.
        #[arg(long)]
        record: Option<PathBuf>,
        #[clap(flatten)]
        output: output::Args,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum Error {
        #[error("could not set up the async runtime")]
        Runtime(#[source] std::io::Error),
        #[error("could not load the model catalog")]
        LoadCatalog(#[source] catalog::Error),
        #[error("could not open the register source")]
        Connect(#[source] connection::Error),
        #[error("discovery failed")]
        Discover(#[source] scanner::Error),
        #[error("could not serialize the schema")]
        SerializeSchema(#[source] serde_json::Error),
        #[error("could not write the schema to {1:?}")]
        WriteSchema(#[source] std::io::Error, PathBuf),
        #[error("could not write the register recording to {1:?}")]
        WriteRecording(#[source] std::io::Error, PathBuf),
        #[error("could not output the decoded points")]
        Output(#[source] output::Error),
    }

    #[derive(serde::Serialize)]
    pub struct PointRecord<'a> {
        pub model: u16,
        #[serde(flatten)]
        pub point: &'a DecodedPoint,
    }

    impl Record for PointRecord<'_> {
        const HEADERS: &'static [&'static str] =
            &["Model", "Address", "Name", "Type", "Value", "Units", "Raw"];

        fn cells(&self) -> Vec<String> {
            let raw = self.point.raw.iter().map(|w| format!("{w:04X}")).collect::<Vec<_>>();
            vec![
                self.model.to_string(),
                self.point.address.map(|a| a.to_string()).unwrap_or_default(),
                self.point.name.clone(),
                self.point.kind.to_string(),
                self.point.value.as_ref().map(|v| v.to_string()).unwrap_or_default(),
                self.point.units.clone().unwrap_or_default(),
                raw.join(" "),
            ]
        }
    }

    impl Args {
        fn options(&self) -> Options {
            Options {
                class: self.address_class,
                base: self
                    .base_address
                    .map(|offset| RegisterAddress { class: self.address_class, offset }),
                description: self.description.clone(),
                limits: Limits { max_models: self.max_models, ..Limits::default() },
                skip_unknown: self.skip_unknown,
            }
        }
    }

    async fn run_async(args: &Args) -> Result<SchemaDevice, Error> {
        let catalog = super::load_catalog(args.models_dir.as_deref()).map_err(Error::LoadCatalog)?;
        let options = args.options();
        let mut connection = args.connection.open().await.map_err(Error::Connect)?;
        let Some(path) = &args.record else {
            return discovery::discover(&mut connection, &catalog, &options)
                .await
                .map_err(Error::Discover);
        };
        let mut recording = Recording::new(connection);
        let result = discovery::discover(&mut recording, &catalog, &options).await;
        // Whatever was read is kept, failed passes included.
        let (_, captured) = recording.into_parts();
        tokio::fs::write(path, captured.to_dump())
            .await
            .map_err(|e| Error::WriteRecording(e, path.clone()))?;
        result.map_err(Error::Discover)
    }

    pub fn run(args: Args) -> Result<(), Error> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;
        let schema = runtime.block_on(run_async(&args))?;
        if let Some(path) = &args.schema {
            let json = serde_json::to_vec_pretty(&schema).map_err(Error::SerializeSchema)?;
            std::fs::write(path, json).map_err(|e| Error::WriteSchema(e, path.clone()))?;
        }
        let mut output = args.output.to_output::<PointRecord>().map_err(Error::Output)?;
        for model in &schema.models {
            for point in &model.points {
                output.write(&PointRecord { model: model.id, point }).map_err(Error::Output)?;
            }
        }
        output.commit().map_err(Error::Output)
    }
}
