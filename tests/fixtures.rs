use std::path::Path;

use sunspec_schema_tools::catalog::Catalog;
use sunspec_schema_tools::discovery::{Options, discover};
use sunspec_schema_tools::recorded::RecordedDevice;
use sunspec_schema_tools::scanner;
use sunspec_schema_tools::schema::{SchemaDevice, Value};
use sunspec_schema_tools::source::{self, Recording, RegisterSource};
use sunspec_schema_tools::sunspec::{AddressClass, RegisterAddress};

const SMA_2025: &str = include_str!("../fixtures/sma-sunny-boy-3.6-2025.txt");
const SMA_2025_THROUGH_124: &str =
    include_str!("../fixtures/sma-sunny-boy-3.6-2025-through-model-124.txt");
const FIMER: &str = include_str!("../fixtures/fimer-3q58.txt");

async fn discover_recording(text: &str, catalog: &Catalog) -> SchemaDevice {
    let mut device = RecordedDevice::parse(text).unwrap();
    discover(&mut device, catalog, &Options::default()).await.unwrap()
}

fn float(value: f64) -> Option<&'static Value> {
    Some(Box::leak(Box::new(Value::Float(value))))
}

fn text(value: &str) -> Option<&'static Value> {
    Some(Box::leak(Box::new(Value::Text(value.into()))))
}

fn unsigned(value: u64) -> Option<&'static Value> {
    Some(Box::leak(Box::new(Value::Unsigned(value))))
}

#[tokio::test]
async fn sma_2025_models_in_order() {
    let schema = discover_recording(SMA_2025_THROUGH_124, &Catalog::builtin()).await;
    assert_eq!(schema.base, RegisterAddress::holding(40000));
    let ids = schema.models.iter().map(|m| m.id).collect::<Vec<_>>();
    assert_eq!(ids, [1, 11, 12, 101, 120, 121, 122, 123, 124]);
    let addresses = schema.models.iter().map(|m| m.address.offset).collect::<Vec<_>>();
    assert_eq!(addresses, [40004, 40072, 40087, 40187, 40239, 40267, 40299, 40345, 40371]);
    assert_eq!(
        schema.description,
        "A schema specifically for the SunSpec device made by SMA model SB3.6-1AV-41 using \
         version 4.01.15.R (SN: 3005067415)"
    );
}

#[tokio::test]
async fn sma_2025_common_model() {
    let schema = discover_recording(SMA_2025_THROUGH_124, &Catalog::builtin()).await;
    let common = schema.model(1).unwrap();
    assert_eq!(common.label.as_deref(), Some("Common"));
    assert_eq!(common.value("Mn"), text("SMA"));
    assert_eq!(common.value("Md"), text("SB3.6-1AV-41"));
    assert_eq!(common.value("Vr"), text("4.01.15.R"));
    assert_eq!(common.value("SN"), text("3005067415"));
    // Present but not implemented.
    assert!(common.point("Opt").is_some());
    assert_eq!(common.value("Opt"), None);
    assert_eq!(common.value("DA"), None);
    assert_eq!(common.point("DA").unwrap().raw, [0xFFFF]);
    assert_eq!(common.point("DA").unwrap().address, Some(RegisterAddress::holding(40068)));
}

#[tokio::test]
async fn sma_2025_inverter_and_nameplate() {
    let schema = discover_recording(SMA_2025_THROUGH_124, &Catalog::builtin()).await;
    let inverter = schema.model(101).unwrap();
    assert_eq!(inverter.points.len(), 43);
    assert_eq!(inverter.value("W"), None);
    assert_eq!(inverter.value("Hz_SF"), Some(&Value::Integer(-2)));
    assert_eq!(inverter.value("WH"), float(29479140.0));
    // DCA_SF is not implemented, so DCA cannot be scaled either way.
    assert_eq!(inverter.value("DCA_SF"), None);
    assert_eq!(inverter.value("DCA"), None);
    assert_eq!(inverter.value("Tmp_SF"), Some(&Value::Integer(0)));
    assert_eq!(inverter.value("Evt1"), unsigned(0));
    assert_eq!(inverter.value("Evt2"), None);

    let nameplate = schema.model(120).unwrap();
    assert_eq!(nameplate.value("DERTyp"), unsigned(4));
    assert_eq!(nameplate.value("WRtg"), float(3680.0));
    assert_eq!(nameplate.value("VArRtgQ1"), float(1840.0));
    assert_eq!(nameplate.value("VArRtgQ2"), None);
    assert_eq!(nameplate.value("ARtg"), float(16.0));
    assert_eq!(nameplate.value("PFRtgQ1"), float(0.8));
    assert_eq!(nameplate.value("PFRtgQ2"), None);
    assert_eq!(nameplate.value("WHRtg"), None);
}

#[tokio::test]
async fn sma_2025_unknown_models_keep_raw_words() {
    let schema = discover_recording(SMA_2025_THROUGH_124, &Catalog::builtin()).await;
    let ethernet = schema.model(11).unwrap();
    assert!(!ethernet.is_known());
    assert!(ethernet.points.is_empty());
    assert_eq!(ethernet.length, 13);
    assert_eq!(ethernet.raw.len(), 13);
    assert_eq!(ethernet.raw[4..7], [0x0040, 0xADA9, 0x9576]);

    let mut device = RecordedDevice::parse(SMA_2025_THROUGH_124).unwrap();
    let options = Options { skip_unknown: true, ..Options::default() };
    let schema = discover(&mut device, &Catalog::builtin(), &options).await.unwrap();
    assert_eq!(schema.models.iter().map(|m| m.id).collect::<Vec<_>>(), [1, 101, 120]);
}

#[tokio::test]
async fn fimer_inverter() {
    let schema = discover_recording(FIMER, &Catalog::builtin()).await;
    assert_eq!(schema.models.len(), 19);
    assert_eq!(
        schema.description,
        "A schema specifically for the SunSpec device made by FIMER model -3Q58- using version \
         2330F (SN: 118747-3Q58-4221)"
    );
    let common = schema.model(1).unwrap();
    assert_eq!(common.value("Opt"), text("0x055C/0x0B57/"));
    assert_eq!(common.value("DA"), unsigned(1));

    let inverter = schema.model(103).unwrap();
    assert_eq!(inverter.label.as_deref(), Some("Inverter (Three Phase)"));
    assert_eq!(inverter.value("A"), float(320.1));
    assert_eq!(inverter.value("AphA"), float(106.7));
    assert_eq!(inverter.value("PhVphA"), float(442.3));
    assert_eq!(inverter.value("W"), float(141380.0));
    assert_eq!(inverter.value("Hz"), float(49.99));
    assert_eq!(inverter.value("PF"), float(-1.0));
    assert_eq!(inverter.value("WH"), float(459493000.0));
    assert_eq!(inverter.value("DCA"), float(154.5));
    assert_eq!(inverter.value("DCV"), None);
    assert_eq!(inverter.value("TmpCab"), float(53.5));
    assert_eq!(inverter.value("TmpTrns"), None);
    assert_eq!(inverter.value("St"), unsigned(4));
    assert_eq!(inverter.value("StVnd"), unsigned(6));

    let nameplate = schema.model(120).unwrap();
    assert_eq!(nameplate.value("WRtg"), float(185000.0));
    assert_eq!(nameplate.value("VArRtgQ3"), float(-175000.0));
    assert_eq!(nameplate.value("ARtg"), float(135.0));
}

#[tokio::test]
async fn fimer_repeating_mppt_modules() {
    let schema = discover_recording(FIMER, &Catalog::builtin()).await;
    let mppt = schema.model(160).unwrap();
    assert_eq!(mppt.length, 248);
    assert_eq!(mppt.points.len(), 7 + 12 * 10);
    assert_eq!(mppt.value("N"), unsigned(12));
    assert_eq!(mppt.value("DCA_SF"), Some(&Value::Integer(-1)));
    assert_eq!(mppt.value("DCWH_SF"), None);
    assert_eq!(mppt.value("TmsPer"), None);

    assert_eq!(mppt.value("Module_0_ID"), unsigned(1));
    assert_eq!(mppt.value("Module_0_IDStr"), text("PV1"));
    assert_eq!(mppt.value("Module_0_DCA"), float(12.8));
    assert_eq!(mppt.value("Module_0_DCV"), float(955.5));
    assert_eq!(mppt.value("Module_0_DCW"), float(12260.0));
    assert_eq!(mppt.value("Module_0_DCWH"), None);
    assert_eq!(mppt.value("Module_0_Tms"), None);
    assert_eq!(mppt.value("Module_0_Tmp"), None);
    assert_eq!(mppt.value("Module_0_DCSt"), unsigned(4));

    assert_eq!(mppt.value("Module_11_ID"), unsigned(12));
    assert_eq!(mppt.value("Module_11_IDStr"), text("PV12"));
    assert_eq!(mppt.value("Module_11_DCA"), float(12.9));
    assert_eq!(mppt.value("Module_11_DCV"), float(931.5));
    assert_eq!(mppt.value("Module_11_DCW"), float(11980.0));
    assert!(mppt.point("Module_12_ID").is_none());
    let last = mppt.points.last().unwrap();
    assert_eq!(last.name, "Module_11_DCEvt");
    assert_eq!(last.address, Some(RegisterAddress::holding(41106 + 246)));
}

#[tokio::test]
async fn models_from_json_definitions() {
    let mut catalog = Catalog::builtin();
    let directory = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/models");
    assert_eq!(catalog.load_dir(&directory).unwrap(), 1);
    let schema = discover_recording(FIMER, &catalog).await;
    let settings = schema.model(145).unwrap();
    assert_eq!(settings.label.as_deref(), Some("Extended Settings"));
    assert_eq!(settings.value("NomRmpUpRte"), float(6000.0));
    assert_eq!(settings.value("NomRmpDnRte"), None);
    assert_eq!(settings.value("ConnRmpUpRte"), float(10.0));
    assert_eq!(settings.value("Rmp_SF"), Some(&Value::Integer(-1)));
    assert_eq!(settings.point("NomRmpUpRte").unwrap().units.as_deref(), Some("Pct"));
}

#[tokio::test]
async fn recordings_replay_to_the_same_schema() {
    let device = RecordedDevice::parse(FIMER).unwrap();
    let mut recording = Recording::new(device);
    let first = discover(&mut recording, &Catalog::builtin(), &Options::default()).await.unwrap();
    let (_, captured) = recording.into_parts();
    let dump = captured.to_dump();
    assert!(dump.starts_with("@hr:40000\n5375 6E53 0001 0042 4649 4D45 5200"));
    let second = discover_recording(&dump, &Catalog::builtin()).await;
    assert_eq!(first, second);
}

#[tokio::test]
async fn schema_document_serializes() {
    let schema = discover_recording(SMA_2025_THROUGH_124, &Catalog::builtin()).await;
    let json = serde_json::to_value(&schema).unwrap();
    assert_eq!(json["base"], "hr:40000");
    assert_eq!(json["models"][0]["id"], 1);
    assert_eq!(json["models"][0]["address"], "hr:40004");
    assert_eq!(json["models"][0]["points"][0]["name"], "Mn");
    assert_eq!(json["models"][0]["points"][0]["type"], "string");
    assert_eq!(json["models"][0]["points"][0]["value"], "SMA");
    assert_eq!(json["models"][0]["points"][2]["value"], serde_json::Value::Null);
    assert_eq!(json["models"][1]["label"], serde_json::Value::Null);
    assert_eq!(json["models"][4]["points"][1]["value"], 3680.0);
}

#[tokio::test]
async fn wrong_address_class_finds_no_marker() {
    let mut device = RecordedDevice::parse(FIMER).unwrap();
    let options = Options { class: AddressClass::Input, ..Options::default() };
    let error = discover(&mut device, &Catalog::builtin(), &options).await.unwrap_err();
    assert!(matches!(error, scanner::Error::InvalidMarker(addresses) if addresses.len() == 3));
}

/// Counts how often discovery closed the device.
struct Closing {
    device: RecordedDevice,
    closed: usize,
}

impl RegisterSource for Closing {
    async fn read(
        &mut self,
        address: RegisterAddress,
        count: u16,
    ) -> Result<Vec<u16>, source::Error> {
        self.device.read(address, count).await
    }

    async fn close(&mut self) {
        self.closed += 1;
    }
}

#[tokio::test]
async fn refused_registers_in_a_body_abort_discovery() {
    let device = RecordedDevice::parse(SMA_2025).unwrap();
    let mut source = Closing { device, closed: 0 };
    let error = discover(&mut source, &Catalog::builtin(), &Options::default()).await.unwrap_err();
    assert_eq!(source.closed, 1);
    // Model 126 is the first model whose body has refused registers.
    let scanner::Error::TransportFailure(cause, address, 64) = error else { panic!("{error:?}") };
    assert_eq!(address, RegisterAddress::holding(40397));
    assert!(matches!(cause, source::Error::Unmapped(a) if a == RegisterAddress::holding(40447)));
}

#[tokio::test]
async fn full_sma_2025_recording_is_complete_past_the_gaps() {
    let device = RecordedDevice::parse(SMA_2025).unwrap();
    // Model 131 body and the terminator.
    assert_eq!(device.value_of(RegisterAddress::holding(40491)), Some(0x0001));
    assert_eq!(device.value_of(RegisterAddress::holding(40540)), None);
    assert_eq!(device.value_of(RegisterAddress::holding(40875)), Some(0xFFFF));
    assert_eq!(device.value_of(RegisterAddress::holding(40876)), Some(0x0000));
    assert_eq!(device.value_of(RegisterAddress::holding(40877)), None);
}
