//! Fixed-layout records exchanged with the control plane.
//!
//! Every record is serialized field by field in little-endian byte order
//! with no implicit padding; string fields are fixed-length, zero-padded
//! UTF-8 and oversize values are rejected before anything is written.
//! Both sides of the connection must agree on these layouts byte for
//! byte.

use crate::core::stage_info::StageInfo;
use crate::enforcement::channel::ChannelStatsRaw;

pub const STAGE_NAME_LEN: usize = 64;
pub const STAGE_ENV_LEN: usize = 128;
pub const STAGE_HOSTNAME_LEN: usize = 256;
pub const STAGE_LOGIN_LEN: usize = 64;
pub const HANDSHAKE_ADDRESS_LEN: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("field {field} is {length} bytes, limit {limit}")]
    FieldTooLong {
        field: &'static str,
        length: usize,
        limit: usize,
    },
    #[error("record truncated: wanted {wanted} bytes, had {available}")]
    Truncated { wanted: usize, available: usize },
    #[error("unknown control operation type {0}")]
    UnknownOperation(i32),
}

// Cursor over a received record.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Reader<'a> {
        Reader { data, offset: 0 }
    }

    fn take(&mut self, length: usize) -> Result<&'a [u8], WireError> {
        if self.offset + length > self.data.len() {
            return Err(WireError::Truncated {
                wanted: length,
                available: self.data.len() - self.offset,
            });
        }
        let slice = &self.data[self.offset..self.offset + length];
        self.offset += length;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, WireError> {
        let bytes = self.take(4)?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64, WireError> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }

    fn read_f64(&mut self) -> Result<f64, WireError> {
        Ok(f64::from_bits(self.read_i64()? as u64))
    }

    fn read_string(&mut self, length: usize) -> Result<String, WireError> {
        let bytes = self.take(length)?;
        let end = bytes.iter().position(|b| *b == 0).unwrap_or(length);
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

fn push_fixed_string(
    out: &mut Vec<u8>,
    value: &str,
    limit: usize,
    field: &'static str,
) -> Result<(), WireError> {
    let bytes = value.as_bytes();
    if bytes.len() > limit {
        return Err(WireError::FieldTooLong {
            field,
            length: bytes.len(),
            limit,
        });
    }
    out.extend_from_slice(bytes);
    out.resize(out.len() + (limit - bytes.len()), 0);
    Ok(())
}

/// Top-level dispatch codes of the southbound protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPlaneOperationType {
    StageHandshake = 1,
    StageReady = 2,
    CreateHousekeepingRule = 3,
    CreateDifferentiationRule = 4,
    CreateEnforcementRule = 5,
    CollectStatistics = 6,
    ExecuteHousekeepingRules = 7,
    RemoveRule = 8,
}

impl ControlPlaneOperationType {
    pub fn from_i32(value: i32) -> Result<ControlPlaneOperationType, WireError> {
        match value {
            1 => Ok(ControlPlaneOperationType::StageHandshake),
            2 => Ok(ControlPlaneOperationType::StageReady),
            3 => Ok(ControlPlaneOperationType::CreateHousekeepingRule),
            4 => Ok(ControlPlaneOperationType::CreateDifferentiationRule),
            5 => Ok(ControlPlaneOperationType::CreateEnforcementRule),
            6 => Ok(ControlPlaneOperationType::CollectStatistics),
            7 => Ok(ControlPlaneOperationType::ExecuteHousekeepingRules),
            8 => Ok(ControlPlaneOperationType::RemoveRule),
            other => Err(WireError::UnknownOperation(other)),
        }
    }
}

/// Housekeeping sub-kinds carried in the header's subtype field.
pub const SUBTYPE_CREATE_CHANNEL: i32 = 1;
pub const SUBTYPE_CREATE_OBJECT: i32 = 2;

/// Rule-kind discriminators used by remove-rule payloads.
pub const RULE_KIND_HOUSEKEEPING: i32 = 1;
pub const RULE_KIND_DIFFERENTIATION: i32 = 2;
pub const RULE_KIND_ENFORCEMENT: i32 = 3;

/// Header preceding every southbound payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlOperation {
    pub operation_type: i32,
    pub operation_subtype: i32,
    pub size: i32,
}

impl ControlOperation {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        out[0..4].copy_from_slice(&self.operation_type.to_le_bytes());
        out[4..8].copy_from_slice(&self.operation_subtype.to_le_bytes());
        out[8..12].copy_from_slice(&self.size.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<ControlOperation, WireError> {
        let mut reader = Reader::new(data);
        Ok(ControlOperation {
            operation_type: reader.read_i32()?,
            operation_subtype: reader.read_i32()?,
            size: reader.read_i32()?,
        })
    }
}

/// Stage identity submitted during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfoRaw {
    pub stage_name: String,
    pub stage_env: String,
    pub pid: i32,
    pub ppid: i32,
    pub stage_hostname: String,
    pub stage_login_name: String,
}

impl StageInfoRaw {
    pub const SIZE: usize =
        STAGE_NAME_LEN + STAGE_ENV_LEN + 4 + 4 + STAGE_HOSTNAME_LEN + STAGE_LOGIN_LEN;

    pub fn from_stage_info(info: &StageInfo) -> StageInfoRaw {
        StageInfoRaw {
            stage_name: info.name().to_string(),
            stage_env: info.env().to_string(),
            pid: info.pid(),
            ppid: info.ppid(),
            stage_hostname: info.hostname().to_string(),
            stage_login_name: info.login_name().to_string(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(Self::SIZE);
        push_fixed_string(&mut out, &self.stage_name, STAGE_NAME_LEN, "stage_name")?;
        push_fixed_string(&mut out, &self.stage_env, STAGE_ENV_LEN, "stage_env")?;
        out.extend_from_slice(&self.pid.to_le_bytes());
        out.extend_from_slice(&self.ppid.to_le_bytes());
        push_fixed_string(
            &mut out,
            &self.stage_hostname,
            STAGE_HOSTNAME_LEN,
            "stage_hostname",
        )?;
        push_fixed_string(
            &mut out,
            &self.stage_login_name,
            STAGE_LOGIN_LEN,
            "stage_login_name",
        )?;
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<StageInfoRaw, WireError> {
        let mut reader = Reader::new(data);
        Ok(StageInfoRaw {
            stage_name: reader.read_string(STAGE_NAME_LEN)?,
            stage_env: reader.read_string(STAGE_ENV_LEN)?,
            pid: reader.read_i32()?,
            ppid: reader.read_i32()?,
            stage_hostname: reader.read_string(STAGE_HOSTNAME_LEN)?,
            stage_login_name: reader.read_string(STAGE_LOGIN_LEN)?,
        })
    }
}

/// Handshake response: where the southbound handler must connect. A
/// negative port means the address is a unix socket path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageHandshakeRaw {
    pub address: String,
    pub port: i32,
}

impl StageHandshakeRaw {
    pub const SIZE: usize = HANDSHAKE_ADDRESS_LEN + 4;

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut out = Vec::with_capacity(Self::SIZE);
        push_fixed_string(&mut out, &self.address, HANDSHAKE_ADDRESS_LEN, "address")?;
        out.extend_from_slice(&self.port.to_le_bytes());
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<StageHandshakeRaw, WireError> {
        let mut reader = Reader::new(data);
        Ok(StageHandshakeRaw {
            address: reader.read_string(HANDSHAKE_ADDRESS_LEN)?,
            port: reader.read_i32()?,
        })
    }
}

/// Housekeeping create-channel payload.
///
/// The selector masks are bitmaps over the differentiation classifiers
/// (bit 0 workflow, bit 1 operation type, bit 2 operation context at
/// channel level; bit 0 operation type, bit 1 operation context at
/// object level); a negative mask keeps the stage's current selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateChannelRaw {
    pub rule_id: i64,
    pub channel_id: i64,
    pub workflow_id: i64,
    pub operation_type: i64,
    pub operation_context: i64,
    pub channel_mask: i32,
    pub create_default_object: i32,
    pub object_mask: i32,
}

impl CreateChannelRaw {
    pub const SIZE: usize = 52;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.rule_id.to_le_bytes());
        out.extend_from_slice(&self.channel_id.to_le_bytes());
        out.extend_from_slice(&self.workflow_id.to_le_bytes());
        out.extend_from_slice(&self.operation_type.to_le_bytes());
        out.extend_from_slice(&self.operation_context.to_le_bytes());
        out.extend_from_slice(&self.channel_mask.to_le_bytes());
        out.extend_from_slice(&self.create_default_object.to_le_bytes());
        out.extend_from_slice(&self.object_mask.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<CreateChannelRaw, WireError> {
        let mut reader = Reader::new(data);
        Ok(CreateChannelRaw {
            rule_id: reader.read_i64()?,
            channel_id: reader.read_i64()?,
            workflow_id: reader.read_i64()?,
            operation_type: reader.read_i64()?,
            operation_context: reader.read_i64()?,
            channel_mask: reader.read_i32()?,
            create_default_object: reader.read_i32()?,
            object_mask: reader.read_i32()?,
        })
    }
}

/// Housekeeping create-object payload. The initial configuration array is
/// length-prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateObjectRaw {
    pub rule_id: i64,
    pub channel_id: i64,
    pub enforcement_object_id: i64,
    pub object_type: i32,
    pub operation_type: i64,
    pub operation_context: i64,
    pub configurations: Vec<i64>,
}

impl CreateObjectRaw {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.rule_id.to_le_bytes());
        out.extend_from_slice(&self.channel_id.to_le_bytes());
        out.extend_from_slice(&self.enforcement_object_id.to_le_bytes());
        out.extend_from_slice(&self.object_type.to_le_bytes());
        out.extend_from_slice(&self.operation_type.to_le_bytes());
        out.extend_from_slice(&self.operation_context.to_le_bytes());
        out.extend_from_slice(&(self.configurations.len() as i32).to_le_bytes());
        for value in &self.configurations {
            out.extend_from_slice(&value.to_le_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<CreateObjectRaw, WireError> {
        let mut reader = Reader::new(data);
        let rule_id = reader.read_i64()?;
        let channel_id = reader.read_i64()?;
        let enforcement_object_id = reader.read_i64()?;
        let object_type = reader.read_i32()?;
        let operation_type = reader.read_i64()?;
        let operation_context = reader.read_i64()?;
        let count = reader.read_i32()?.max(0) as usize;
        let mut configurations = Vec::with_capacity(count);
        for _ in 0..count {
            configurations.push(reader.read_i64()?);
        }
        Ok(CreateObjectRaw {
            rule_id,
            channel_id,
            enforcement_object_id,
            object_type,
            operation_type,
            operation_context,
            configurations,
        })
    }
}

/// Differentiation rule payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifferentiationRuleRaw {
    pub rule_id: i64,
    pub rule_type: i32,
    pub channel_id: i64,
    pub enforcement_object_id: i64,
    pub workflow_id: i64,
    pub operation_type: i64,
    pub operation_context: i64,
}

impl DifferentiationRuleRaw {
    pub const SIZE: usize = 52;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.rule_id.to_le_bytes());
        out.extend_from_slice(&self.rule_type.to_le_bytes());
        out.extend_from_slice(&self.channel_id.to_le_bytes());
        out.extend_from_slice(&self.enforcement_object_id.to_le_bytes());
        out.extend_from_slice(&self.workflow_id.to_le_bytes());
        out.extend_from_slice(&self.operation_type.to_le_bytes());
        out.extend_from_slice(&self.operation_context.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<DifferentiationRuleRaw, WireError> {
        let mut reader = Reader::new(data);
        Ok(DifferentiationRuleRaw {
            rule_id: reader.read_i64()?,
            rule_type: reader.read_i32()?,
            channel_id: reader.read_i64()?,
            enforcement_object_id: reader.read_i64()?,
            workflow_id: reader.read_i64()?,
            operation_type: reader.read_i64()?,
            operation_context: reader.read_i64()?,
        })
    }
}

/// Enforcement rule payload: three property slots, `-1` meaning unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnforcementRuleRaw {
    pub rule_id: i64,
    pub channel_id: i64,
    pub enforcement_object_id: i64,
    pub enforcement_operation: i32,
    pub property_first: i64,
    pub property_second: i64,
    pub property_third: i64,
}

impl EnforcementRuleRaw {
    pub const SIZE: usize = 52;

    pub fn properties(&self) -> Vec<i64> {
        [self.property_first, self.property_second, self.property_third]
            .into_iter()
            .filter(|property| *property != -1)
            .collect()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.rule_id.to_le_bytes());
        out.extend_from_slice(&self.channel_id.to_le_bytes());
        out.extend_from_slice(&self.enforcement_object_id.to_le_bytes());
        out.extend_from_slice(&self.enforcement_operation.to_le_bytes());
        out.extend_from_slice(&self.property_first.to_le_bytes());
        out.extend_from_slice(&self.property_second.to_le_bytes());
        out.extend_from_slice(&self.property_third.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<EnforcementRuleRaw, WireError> {
        let mut reader = Reader::new(data);
        Ok(EnforcementRuleRaw {
            rule_id: reader.read_i64()?,
            channel_id: reader.read_i64()?,
            enforcement_object_id: reader.read_i64()?,
            enforcement_operation: reader.read_i32()?,
            property_first: reader.read_i64()?,
            property_second: reader.read_i64()?,
            property_third: reader.read_i64()?,
        })
    }
}

/// Remove-rule payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoveRuleRaw {
    pub rule_kind: i32,
    pub rule_id: i64,
}

impl RemoveRuleRaw {
    pub const SIZE: usize = 12;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.extend_from_slice(&self.rule_kind.to_le_bytes());
        out.extend_from_slice(&self.rule_id.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<RemoveRuleRaw, WireError> {
        let mut reader = Reader::new(data);
        Ok(RemoveRuleRaw {
            rule_kind: reader.read_i32()?,
            rule_id: reader.read_i64()?,
        })
    }
}

/// Acknowledgement written after each handled control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: i32,
}

impl Ack {
    pub const SIZE: usize = 4;
    pub const OK: i32 = 1;
    pub const ERROR: i32 = 0;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        self.status.to_le_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Ack, WireError> {
        let mut reader = Reader::new(data);
        Ok(Ack {
            status: reader.read_i32()?,
        })
    }
}

/// Aggregated stage statistics returned by collect-statistics: a channel
/// count followed by one entry per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsGlobalRaw {
    pub channels: Vec<ChannelStatsRaw>,
}

impl StatsGlobalRaw {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(self.channels.len() as i32).to_le_bytes());
        for channel in &self.channels {
            out.extend_from_slice(&channel.channel_id.to_le_bytes());
            out.extend_from_slice(&(channel.total_operations as f64).to_bits().to_le_bytes());
            out.extend_from_slice(&(channel.total_bytes as f64).to_bits().to_le_bytes());
            out.extend_from_slice(&(channel.windowed_operations as f64).to_bits().to_le_bytes());
            out.extend_from_slice(&(channel.windowed_bytes as f64).to_bits().to_le_bytes());
        }
        out
    }

    pub fn decode(data: &[u8]) -> Result<StatsGlobalRaw, WireError> {
        let mut reader = Reader::new(data);
        let count = reader.read_i32()?.max(0) as usize;
        let mut channels = Vec::with_capacity(count);
        for _ in 0..count {
            channels.push(ChannelStatsRaw {
                channel_id: reader.read_i64()?,
                total_operations: reader.read_f64()? as i64,
                total_bytes: reader.read_f64()? as i64,
                windowed_operations: reader.read_f64()? as i64,
                windowed_bytes: reader.read_f64()? as i64,
            });
        }
        Ok(StatsGlobalRaw { channels })
    }
}
