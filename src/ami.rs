//! AMI creation.
//!
//! [`AmiCreator`] starts image creations from running instances and tracks
//! them until EC2 reports that none is still pending. Several AMIs can be
//! created in parallel.

use aws_config::BehaviorVersion;
use aws_sdk_ec2::error::DisplayErrorContext;
use aws_sdk_ec2::types::ImageState;
use aws_sdk_ec2::Client;
use chrono::{DateTime, Local, TimeZone};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{debug, warn};

use crate::error::{Error, Result};

static NAME_FORMAT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("Invalid AMI name format regex"));

/// An AMI whose creation has been requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAmi {
    /// ID of the new image
    pub id: String,
    /// Last known image state
    pub state: String,
}

impl PendingAmi {
    pub fn is_pending(&self) -> bool {
        self.state == ImageState::Pending.as_str()
    }
}

/// Creates AMIs and tracks their progress.
#[derive(Debug)]
pub struct AmiCreator {
    client: Client,
    pending_amis: Vec<PendingAmi>,
}

impl AmiCreator {
    /// Connects to EC2 using the standard AWS credential chain.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_ec2::config::Region::new(region.to_string()))
            .load()
            .await;

        Self {
            client: Client::new(&config),
            pending_amis: Vec::new(),
        }
    }

    /// Starts creating an AMI from an instance.
    pub async fn create_ami(
        &mut self,
        instance_id: &str,
        name: &str,
        description: &str,
    ) -> Result<PendingAmi> {
        let resp = self
            .client
            .create_image()
            .instance_id(instance_id)
            .name(name)
            .description(description)
            .send()
            .await
            .map_err(|e| Error::aws("CreateImage", DisplayErrorContext(&e).to_string()))?;

        let id = resp
            .image_id()
            .map(str::to_string)
            .ok_or_else(|| Error::aws("CreateImage", "no image ID was returned"))?;

        debug!("Requested AMI {} from instance {}", id, instance_id);

        let pending_ami = PendingAmi {
            id,
            state: ImageState::Pending.as_str().to_string(),
        };
        self.pending_amis.push(pending_ami.clone());

        Ok(pending_ami)
    }

    /// Returns the AMIs created so far.
    pub fn amis(&self) -> &[PendingAmi] {
        &self.pending_amis
    }

    /// Refreshes the state of every tracked AMI and returns whether any is
    /// still pending.
    pub async fn pending(&mut self) -> Result<bool> {
        if self.pending_amis.is_empty() {
            return Ok(false);
        }

        let ids: Vec<String> = self.pending_amis.iter().map(|ami| ami.id.clone()).collect();

        let resp = self
            .client
            .describe_images()
            .set_image_ids(Some(ids))
            .send()
            .await
            .map_err(|e| Error::aws("DescribeImages", DisplayErrorContext(&e).to_string()))?;

        for image in resp.images() {
            let (Some(id), Some(state)) = (image.image_id(), image.state()) else {
                continue;
            };

            if let Some(ami) = self.pending_amis.iter_mut().find(|ami| ami.id == id) {
                ami.state = state.as_str().to_string();
            }
        }

        Ok(self.pending_amis.iter().any(PendingAmi::is_pending))
    }
}

/// Expands the date placeholders of an AMI name format.
///
/// Supported placeholders: `{yyyy}`, `{mm}`, `{dd}`, `{HH}`, `{MM}` and
/// `{SS}`. Unknown placeholders are left untouched.
pub fn expand_name_format<Tz>(name_format: &str, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    NAME_FORMAT_RE
        .replace_all(name_format, |caps: &Captures| {
            let pattern = match &caps[1] {
                "yyyy" => "%Y",
                "mm" => "%m",
                "dd" => "%d",
                "HH" => "%H",
                "MM" => "%M",
                "SS" => "%S",
                other => {
                    warn!("Unknown placeholder {{{}}} in AMI name format", other);
                    return caps[0].to_string();
                }
            };
            now.format(pattern).to_string()
        })
        .into_owned()
}

/// Generates an AMI name from its format using the local time.
pub fn generate_ami_name(name_format: &str) -> String {
    expand_name_format(name_format, &Local::now())
}
