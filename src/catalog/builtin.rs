//! Definitions of the models most inverters implement.

use super::{GroupCount, GroupDefinition, ModelDefinition, PointLayout, ScaleFactor, TypeKind};

macro_rules! optional {
    () => {
        None
    };
    ($($lit: tt)+) => {
        Some($($lit)*)
    };
}

macro_rules! words {
    ($kind: ident) => {
        TypeKind::$kind.fixed_words()
    };
    ($kind: ident, $words: literal) => {
        $words
    };
}

macro_rules! points {
    ($($name: literal: $kind: ident $([$words: literal])?, $label: literal $(, sf = $sf: literal)? $(, units = $units: literal)?;)*) => {
        vec![$(PointLayout {
            name: $name.into(),
            kind: TypeKind::$kind,
            words: words!($kind $(, $words)?),
            scale_factor: optional!($(ScaleFactor::Point($sf.into()))?),
            units: optional!($($units.into())?),
            label: Some($label.into()),
        }),*]
    };
}

fn model(id: u16, label: &str, description: &str, points: Vec<PointLayout>) -> ModelDefinition {
    ModelDefinition {
        id,
        label: label.into(),
        description: Some(description.into()),
        group: GroupDefinition {
            name: label.to_lowercase().replace(' ', "_"),
            count: GroupCount::Once,
            points,
            groups: Vec::new(),
        },
    }
}

pub(super) fn models() -> Vec<ModelDefinition> {
    let mut models = vec![common()];
    for (id, label) in [
        (101, "Inverter (Single Phase)"),
        (102, "Inverter (Split Phase)"),
        (103, "Inverter (Three Phase)"),
    ] {
        models.push(inverter(id, label));
    }
    models.push(nameplate());
    models.push(multiple_mppt());
    models
}

fn common() -> ModelDefinition {
    model(1, "Common", "All SunSpec compliant devices must include this as the first model", points! {
        "Mn": String[16], "Manufacturer";
        "Md": String[16], "Model";
        "Opt": String[8], "Options";
        "Vr": String[8], "Version";
        "SN": String[16], "Serial Number";
        "DA": Uint16, "Device Address";
        "Pad": Pad, "Pad";
    })
}

fn inverter(id: u16, label: &str) -> ModelDefinition {
    model(id, label, "Inverter measurements and status", points! {
        "A": Uint16, "Amps", sf = "A_SF", units = "A";
        "AphA": Uint16, "Amps PhaseA", sf = "A_SF", units = "A";
        "AphB": Uint16, "Amps PhaseB", sf = "A_SF", units = "A";
        "AphC": Uint16, "Amps PhaseC", sf = "A_SF", units = "A";
        "A_SF": Sunssf, "Amps scale factor";
        "PPVphAB": Uint16, "Phase Voltage AB", sf = "V_SF", units = "V";
        "PPVphBC": Uint16, "Phase Voltage BC", sf = "V_SF", units = "V";
        "PPVphCA": Uint16, "Phase Voltage CA", sf = "V_SF", units = "V";
        "PhVphA": Uint16, "Phase Voltage AN", sf = "V_SF", units = "V";
        "PhVphB": Uint16, "Phase Voltage BN", sf = "V_SF", units = "V";
        "PhVphC": Uint16, "Phase Voltage CN", sf = "V_SF", units = "V";
        "V_SF": Sunssf, "Voltage scale factor";
        "W": Int16, "Watts", sf = "W_SF", units = "W";
        "W_SF": Sunssf, "Watts scale factor";
        "Hz": Uint16, "Hz", sf = "Hz_SF", units = "Hz";
        "Hz_SF": Sunssf, "Hz scale factor";
        "VA": Int16, "VA", sf = "VA_SF", units = "VA";
        "VA_SF": Sunssf, "VA scale factor";
        "VAr": Int16, "VAr", sf = "VAr_SF", units = "var";
        "VAr_SF": Sunssf, "VAr scale factor";
        "PF": Int16, "PF", sf = "PF_SF", units = "Pct";
        "PF_SF": Sunssf, "PF scale factor";
        "WH": Acc32, "WattHours", sf = "WH_SF", units = "Wh";
        "WH_SF": Sunssf, "WattHours scale factor";
        "DCA": Uint16, "DC Amps", sf = "DCA_SF", units = "A";
        "DCA_SF": Sunssf, "DC Amps scale factor";
        "DCV": Uint16, "DC Voltage", sf = "DCV_SF", units = "V";
        "DCV_SF": Sunssf, "DC Voltage scale factor";
        "DCW": Int16, "DC Watts", sf = "DCW_SF", units = "W";
        "DCW_SF": Sunssf, "DC Watts scale factor";
        "TmpCab": Int16, "Cabinet Temperature", sf = "Tmp_SF", units = "C";
        "TmpSnk": Int16, "Heat Sink Temperature", sf = "Tmp_SF", units = "C";
        "TmpTrns": Int16, "Transformer Temperature", sf = "Tmp_SF", units = "C";
        "TmpOt": Int16, "Other Temperature", sf = "Tmp_SF", units = "C";
        "Tmp_SF": Sunssf, "Temperature scale factor";
        "St": Enum16, "Operating State";
        "StVnd": Enum16, "Vendor Operating State";
        "Evt1": Bitfield32, "Event1";
        "Evt2": Bitfield32, "Event Bitfield 2";
        "EvtVnd1": Bitfield32, "Vendor Event Bitfield 1";
        "EvtVnd2": Bitfield32, "Vendor Event Bitfield 2";
        "EvtVnd3": Bitfield32, "Vendor Event Bitfield 3";
        "EvtVnd4": Bitfield32, "Vendor Event Bitfield 4";
    })
}

fn nameplate() -> ModelDefinition {
    model(120, "Nameplate", "Inverter Controls Nameplate Ratings", points! {
        "DERTyp": Enum16, "DERTyp";
        "WRtg": Uint16, "WRtg", sf = "WRtg_SF", units = "W";
        "WRtg_SF": Sunssf, "WRtg_SF";
        "VARtg": Uint16, "VARtg", sf = "VARtg_SF", units = "VA";
        "VARtg_SF": Sunssf, "VARtg_SF";
        "VArRtgQ1": Int16, "VArRtgQ1", sf = "VArRtg_SF", units = "var";
        "VArRtgQ2": Int16, "VArRtgQ2", sf = "VArRtg_SF", units = "var";
        "VArRtgQ3": Int16, "VArRtgQ3", sf = "VArRtg_SF", units = "var";
        "VArRtgQ4": Int16, "VArRtgQ4", sf = "VArRtg_SF", units = "var";
        "VArRtg_SF": Sunssf, "VArRtg_SF";
        "ARtg": Uint16, "ARtg", sf = "ARtg_SF", units = "A";
        "ARtg_SF": Sunssf, "ARtg_SF";
        "PFRtgQ1": Int16, "PFRtgQ1", sf = "PFRtg_SF", units = "cos()";
        "PFRtgQ2": Int16, "PFRtgQ2", sf = "PFRtg_SF", units = "cos()";
        "PFRtgQ3": Int16, "PFRtgQ3", sf = "PFRtg_SF", units = "cos()";
        "PFRtgQ4": Int16, "PFRtgQ4", sf = "PFRtg_SF", units = "cos()";
        "PFRtg_SF": Sunssf, "PFRtg_SF";
        "WHRtg": Uint16, "WHRtg", sf = "WHRtg_SF", units = "Wh";
        "WHRtg_SF": Sunssf, "WHRtg_SF";
        "AhrRtg": Uint16, "AhrRtg", sf = "AhrRtg_SF", units = "AH";
        "AhrRtg_SF": Sunssf, "AhrRtg_SF";
        "MaxChaRte": Uint16, "MaxChaRte", sf = "MaxChaRte_SF", units = "W";
        "MaxChaRte_SF": Sunssf, "MaxChaRte_SF";
        "MaxDisChaRte": Uint16, "MaxDisChaRte", sf = "MaxDisChaRte_SF", units = "W";
        "MaxDisChaRte_SF": Sunssf, "MaxDisChaRte_SF";
        "Pad": Pad, "Pad";
    })
}

fn multiple_mppt() -> ModelDefinition {
    let mut definition = model(160, "Multiple MPPT Inverter Extension Model", "Multiple MPPT", points! {
        "DCA_SF": Sunssf, "Current Scale Factor";
        "DCV_SF": Sunssf, "Voltage Scale Factor";
        "DCW_SF": Sunssf, "Power Scale Factor";
        "DCWH_SF": Sunssf, "Energy Scale Factor";
        "Evt": Bitfield32, "Global Events";
        "N": Count, "Number of Modules";
        "TmsPer": Uint16, "Timestamp Period";
    });
    definition.group.name = "mppt".into();
    definition.group.groups.push(GroupDefinition {
        name: "module".into(),
        count: GroupCount::Point("N".into()),
        points: points! {
            "ID": Uint16, "Input ID";
            "IDStr": String[8], "Input ID Sting";
            "DCA": Uint16, "DC Current", sf = "DCA_SF", units = "A";
            "DCV": Uint16, "DC Voltage", sf = "DCV_SF", units = "V";
            "DCW": Uint16, "DC Power", sf = "DCW_SF", units = "W";
            "DCWH": Acc32, "Lifetime Energy", sf = "DCWH_SF", units = "Wh";
            "Tms": Uint32, "Timestamp", units = "Secs";
            "Tmp": Int16, "Temperature", units = "C";
            "DCSt": Enum16, "Operating State";
            "DCEvt": Bitfield32, "Module Events";
        },
        groups: Vec::new(),
    });
    definition
}
