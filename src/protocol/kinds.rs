//! Request and event kind catalogs
//!
//! Both enums are closed; the numeric ids are the modem's opcodes.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

macro_rules! define_kinds {
    (
        $(#[$enum_meta:meta])*
        $name:ident {
            $( $variant:ident = $id:literal, $display:literal; )*
        }
    ) => {
        $(#[$enum_meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub enum $name {
            $( #[serde(rename = $display)] $variant, )*
        }

        impl $name {
            /// Every defined kind, in opcode order.
            pub const ALL: &'static [$name] = &[ $( $name::$variant, )* ];

            /// Decode from the wire id. Returns `None` for unknown ids.
            pub fn from_i32(value: i32) -> Option<Self> {
                match value {
                    $( $id => Some(Self::$variant), )*
                    _ => None,
                }
            }

            pub fn as_i32(self) -> i32 {
                match self {
                    $( Self::$variant => $id, )*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $( Self::$variant => $display, )*
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl FromStr for $name {
            type Err = String;

            /// Accepts either the symbolic name (case-insensitive) or the numeric id.
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if let Ok(id) = s.parse::<i32>() {
                    return Self::from_i32(id)
                        .ok_or_else(|| format!("Unknown {} id: {}", stringify!($name), id));
                }
                Self::ALL
                    .iter()
                    .copied()
                    .find(|kind| kind.name().eq_ignore_ascii_case(s))
                    .ok_or_else(|| format!("Unknown {}: {}", stringify!($name), s))
            }
        }
    };
}

define_kinds! {
    /// Solicited request opcodes.
    RequestKind {
        GetSimStatus = 1, "GET_SIM_STATUS";
        EnterSimPin = 2, "ENTER_SIM_PIN";
        GetCurrentCalls = 9, "GET_CURRENT_CALLS";
        Dial = 10, "DIAL";
        GetImsi = 11, "GET_IMSI";
        Hangup = 12, "HANGUP";
        HangupWaitingOrBackground = 13, "HANGUP_WAITING_OR_BACKGROUND";
        HangupForegroundResumeBackground = 14, "HANGUP_FOREGROUND_RESUME_BACKGROUND";
        SwitchWaitingOrHoldingAndActive = 15, "SWITCH_WAITING_OR_HOLDING_AND_ACTIVE";
        Conference = 16, "CONFERENCE";
        LastCallFailCause = 18, "LAST_CALL_FAIL_CAUSE";
        SignalStrength = 19, "SIGNAL_STRENGTH";
        VoiceRegistrationState = 20, "VOICE_REGISTRATION_STATE";
        DataRegistrationState = 21, "DATA_REGISTRATION_STATE";
        Operator = 22, "OPERATOR";
        RadioPower = 23, "RADIO_POWER";
        Dtmf = 24, "DTMF";
        SendSms = 25, "SEND_SMS";
        SetupDataCall = 27, "SETUP_DATA_CALL";
        SimIo = 28, "SIM_IO";
        Answer = 40, "ANSWER";
        DeactivateDataCall = 41, "DEACTIVATE_DATA_CALL";
        DtmfStart = 49, "DTMF_START";
        DtmfStop = 50, "DTMF_STOP";
        BasebandVersion = 51, "BASEBAND_VERSION";
        SeparateConnection = 52, "SEPARATE_CONNECTION";
        ScreenState = 61, "SCREEN_STATE";
        ExplicitCallTransfer = 72, "EXPLICIT_CALL_TRANSFER";
        ReportStkServiceIsRunning = 103, "REPORT_STK_SERVICE_IS_RUNNING";
        GetCellInfoList = 109, "GET_CELL_INFO_LIST";
        GetHardwareConfig = 124, "GET_HARDWARE_CONFIG";
        Shutdown = 129, "SHUTDOWN";
        GetRadioCapability = 130, "GET_RADIO_CAPABILITY";
        StartLce = 132, "START_LCE";
        StopLce = 133, "STOP_LCE";
        PullLceData = 134, "PULL_LCEDATA";
        GetActivityInfo = 135, "GET_ACTIVITY_INFO";
    }
}

define_kinds! {
    /// Unsolicited event opcodes.
    EventKind {
        RadioStateChanged = 1000, "RADIO_STATE_CHANGED";
        CallStateChanged = 1001, "CALL_STATE_CHANGED";
        VoiceNetworkStateChanged = 1002, "VOICE_NETWORK_STATE_CHANGED";
        NewSms = 1003, "NEW_SMS";
        NitzTimeReceived = 1008, "NITZ_TIME_RECEIVED";
        SignalStrength = 1009, "SIGNAL_STRENGTH";
        DataCallListChanged = 1010, "DATA_CALL_LIST_CHANGED";
        CallRing = 1018, "CALL_RING";
        SimStatusChanged = 1019, "SIM_STATUS_CHANGED";
        RilConnected = 1034, "RIL_CONNECTED";
        CellInfoList = 1036, "CELL_INFO_LIST";
        HardwareConfigChanged = 1040, "HARDWARE_CONFIG_CHANGED";
        LceData = 1045, "LCEDATA_RECV";
        ModemRestart = 1047, "MODEM_RESTART";
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_kind_ids_roundtrip() {
        for kind in RequestKind::ALL {
            assert_eq!(RequestKind::from_i32(kind.as_i32()), Some(*kind));
        }
        assert_eq!(RequestKind::from_i32(0), None);
    }

    #[test]
    fn test_parse_by_name_or_id() {
        assert_eq!("dtmf_start".parse::<RequestKind>(), Ok(RequestKind::DtmfStart));
        assert_eq!("130".parse::<RequestKind>(), Ok(RequestKind::GetRadioCapability));
        assert_eq!("1034".parse::<EventKind>(), Ok(EventKind::RilConnected));
        assert!("NOPE".parse::<EventKind>().is_err());
        assert!("9999".parse::<RequestKind>().is_err());
    }

    #[test]
    fn test_serializes_as_wire_name() {
        let json = serde_json::to_string(&RequestKind::PullLceData).unwrap();
        assert_eq!(json, "\"PULL_LCEDATA\"");
    }
}
