//! CloudFormation operations.
//!
//! [`CloudFormation`] wraps the AWS SDK client with the handful of calls the
//! commands need: looking up stacks and their events, validating templates
//! and creating, updating or deleting stacks while streaming events until
//! the operation settles.

use std::time::Duration;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::error::{DisplayErrorContext, ProvideErrorMetadata};
use aws_sdk_cloudformation::primitives::DateTime as AwsDateTime;
use aws_sdk_cloudformation::types::{
    Capability, Parameter, ResourceStatus, Stack, StackStatus, Tag,
};
use aws_sdk_cloudformation::Client;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Default stack creation timeout.
pub const DEFAULT_TIMEOUT_MINS: u64 = 30;

/// Default delay between two polls of a stack being created or updated.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Extra time allowed past the stack timeout before giving up on waiting.
const WAIT_GRACE: Duration = Duration::from_secs(5 * 60);

/// Statuses of stacks whose outputs can be used by other stacks.
pub const USABLE_STACK_STATUSES: [&str; 3] =
    ["CREATE_COMPLETE", "UPDATE_COMPLETE", "UPDATE_ROLLBACK_COMPLETE"];

const NO_UPDATES_MESSAGE: &str = "No updates are to be performed.";

/// A stack as reported by CloudFormation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackInfo {
    pub stack_id: String,
    pub stack_name: String,
    pub status: String,
    pub description: Option<String>,
    pub created: Option<DateTime<Utc>>,
    pub tags: IndexMap<String, String>,
    pub outputs: IndexMap<String, String>,
    pub parameters: IndexMap<String, String>,
}

impl StackInfo {
    /// Returns the value of an output.
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.get(name).map(String::as_str)
    }
}

/// An event on a stack, such as a resource being created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackEvent {
    pub event_id: String,
    pub logical_resource_id: String,
    pub resource_type: String,
    pub resource_status: String,
    pub resource_status_reason: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A parameter declared by a template, as returned by validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateParameter {
    pub key: String,
    pub default_value: Option<String>,
    pub description: Option<String>,
    pub no_echo: bool,
}

/// Everything needed to create or update a stack.
#[derive(Debug, Clone)]
pub struct StackRequest<'a> {
    pub stack_name: &'a str,
    pub template_body: &'a str,
    pub params: &'a IndexMap<String, String>,
    pub tags: &'a IndexMap<String, String>,
    /// Roll back on failure. Creation failures otherwise leave the stack
    /// as is for inspection.
    pub rollback_on_error: bool,
    pub timeout_mins: u64,
}

/// Source of stacks for resolving parameters from other stacks' outputs.
#[async_trait]
pub trait StackSource: Send + Sync {
    /// Returns the stacks with one of `statuses` (any status when empty)
    /// carrying every tag in `tags`.
    async fn lookup_stacks(
        &self,
        statuses: &[&str],
        tags: &IndexMap<String, String>,
    ) -> Result<Vec<StackInfo>>;
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// The CloudFormation API calls behind [`CloudFormation`].
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Returns one page of all stacks.
    async fn describe_stacks(&self, next_token: Option<String>) -> Result<Page<StackInfo>>;

    /// Returns a single stack, or `None` if it does not exist.
    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackInfo>>;

    /// Returns one page of a stack's events, newest first.
    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<String>,
    ) -> Result<Page<StackEvent>>;

    async fn validate_template(&self, template_body: &str) -> Result<Vec<TemplateParameter>>;

    /// Starts creating a stack and returns its ID.
    async fn create_stack(&self, request: &StackRequest<'_>) -> Result<String>;

    /// Starts updating a stack and returns its ID.
    async fn update_stack(&self, request: &StackRequest<'_>) -> Result<String>;

    async fn delete_stack(&self, stack_id: &str) -> Result<()>;
}

#[async_trait]
impl StackApi for Client {
    async fn describe_stacks(&self, next_token: Option<String>) -> Result<Page<StackInfo>> {
        let resp = Client::describe_stacks(self)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| Error::aws("DescribeStacks", DisplayErrorContext(&e).to_string()))?;

        Ok(Page {
            items: resp.stacks().iter().map(stack_info).collect(),
            next_token: more(resp.next_token()),
        })
    }

    async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackInfo>> {
        let resp = Client::describe_stacks(self).stack_name(stack_name).send().await;

        match resp {
            Ok(resp) => Ok(resp.stacks().first().map(stack_info)),
            Err(e) if stack_missing(e.as_service_error().and_then(|se| se.message())) => Ok(None),
            Err(e) => Err(Error::aws("DescribeStacks", DisplayErrorContext(&e).to_string())),
        }
    }

    async fn describe_stack_events(
        &self,
        stack_name: &str,
        next_token: Option<String>,
    ) -> Result<Page<StackEvent>> {
        let resp = Client::describe_stack_events(self)
            .stack_name(stack_name)
            .set_next_token(next_token)
            .send()
            .await
            .map_err(|e| Error::aws("DescribeStackEvents", DisplayErrorContext(&e).to_string()))?;

        Ok(Page {
            items: resp
                .stack_events()
                .iter()
                .map(|event| StackEvent {
                    event_id: text(event.event_id()).unwrap_or_default(),
                    logical_resource_id: text(event.logical_resource_id()).unwrap_or_default(),
                    resource_type: text(event.resource_type()).unwrap_or_default(),
                    resource_status: resource_status(event.resource_status()),
                    resource_status_reason: text(event.resource_status_reason()),
                    timestamp: timestamp(event.timestamp()),
                })
                .collect(),
            next_token: more(resp.next_token()),
        })
    }

    async fn validate_template(&self, template_body: &str) -> Result<Vec<TemplateParameter>> {
        let resp = Client::validate_template(self)
            .template_body(template_body)
            .send()
            .await
            .map_err(|e| Error::aws("ValidateTemplate", DisplayErrorContext(&e).to_string()))?;

        Ok(resp
            .parameters()
            .iter()
            .map(|param| TemplateParameter {
                key: text(param.parameter_key()).unwrap_or_default(),
                default_value: text(param.default_value()),
                description: text(param.description()),
                no_echo: param.no_echo().unwrap_or(false),
            })
            .collect())
    }

    async fn create_stack(&self, request: &StackRequest<'_>) -> Result<String> {
        let resp = Client::create_stack(self)
            .stack_name(request.stack_name)
            .template_body(request.template_body)
            .set_parameters(Some(parameters(request.params)))
            .set_tags(Some(tags(request.tags)?))
            .timeout_in_minutes(i32::try_from(request.timeout_mins).unwrap_or(i32::MAX))
            .disable_rollback(!request.rollback_on_error)
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(|e| Error::aws("CreateStack", DisplayErrorContext(&e).to_string()))?;

        Ok(text(resp.stack_id()).unwrap_or_else(|| request.stack_name.to_string()))
    }

    async fn update_stack(&self, request: &StackRequest<'_>) -> Result<String> {
        let resp = Client::update_stack(self)
            .stack_name(request.stack_name)
            .template_body(request.template_body)
            .set_parameters(Some(parameters(request.params)))
            .set_tags(Some(tags(request.tags)?))
            .disable_rollback(!request.rollback_on_error)
            .capabilities(Capability::CapabilityIam)
            .capabilities(Capability::CapabilityNamedIam)
            .send()
            .await
            .map_err(|e| {
                update_error(
                    e.as_service_error().and_then(|se| se.message()),
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        Ok(text(resp.stack_id()).unwrap_or_else(|| request.stack_name.to_string()))
    }

    async fn delete_stack(&self, stack_id: &str) -> Result<()> {
        Client::delete_stack(self)
            .stack_name(stack_id)
            .send()
            .await
            .map_err(|e| Error::aws("DeleteStack", DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}

/// Client for CloudFormation in one region.
#[derive(Debug, Clone)]
pub struct CloudFormation<A = Client> {
    api: A,
    poll_interval: Duration,
}

impl CloudFormation {
    /// Connects to CloudFormation using the standard AWS credential chain.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_sdk_cloudformation::config::Region::new(region.to_string()))
            .load()
            .await;

        debug!("Connected to CloudFormation in {}", region);

        Self::with_api(Client::new(&config))
    }
}

impl<A: StackApi> CloudFormation<A> {
    pub fn with_api(api: A) -> Self {
        Self {
            api,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Sets the delay between polls while waiting on a stack.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns all stacks, filtered by status and tags.
    pub async fn lookup_stacks(
        &self,
        statuses: &[&str],
        tags: &IndexMap<String, String>,
    ) -> Result<Vec<StackInfo>> {
        let mut stacks = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self.api.describe_stacks(next_token.take()).await?;
            stacks.extend(page.items);

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        debug!("Found {} stacks", stacks.len());

        Ok(stacks
            .into_iter()
            .filter(|stack| statuses.is_empty() || statuses.contains(&stack.status.as_str()))
            .filter(|stack| stack_has_tags(&stack.tags, tags))
            .collect())
    }

    /// Returns the stack with the given name or ID.
    pub async fn lookup_stack(&self, stack_name: &str) -> Result<StackInfo> {
        self.api
            .describe_stack(stack_name)
            .await?
            .ok_or_else(|| Error::StackLookup(format!("The stack \"{}\" was not found", stack_name)))
    }

    /// Returns all events of a stack, newest first.
    pub async fn lookup_stack_events(&self, stack_name: &str) -> Result<Vec<StackEvent>> {
        self.events_until(stack_name, None).await
    }

    /// Validates a template body, returning the parameters it declares.
    pub async fn validate_template(&self, template_body: &str) -> Result<Vec<TemplateParameter>> {
        self.api.validate_template(template_body).await
    }

    /// Creates a stack and waits for the creation to finish.
    ///
    /// Events are passed to `on_event` oldest first as they happen. Returns
    /// the new stack's ID.
    pub async fn create_stack_and_wait<F>(
        &self,
        request: &StackRequest<'_>,
        on_event: F,
    ) -> Result<String>
    where
        F: FnMut(&StackEvent) + Send,
    {
        info!("Creating stack {}", request.stack_name);

        let stack_id = self.api.create_stack(request).await?;
        let status = self
            .wait_for_stack(&stack_id, None, request.timeout_mins, on_event)
            .await?;

        if status != "CREATE_COMPLETE" {
            return Err(Error::StackFailed {
                stack: request.stack_name.to_string(),
                status,
            });
        }

        Ok(stack_id)
    }

    /// Updates a stack and waits for the update to finish.
    ///
    /// Only events newer than the update are reported. Fails with
    /// [`Error::StackUpdateNotRequired`] if the stack already matches.
    pub async fn update_stack_and_wait<F>(
        &self,
        request: &StackRequest<'_>,
        on_event: F,
    ) -> Result<String>
    where
        F: FnMut(&StackEvent) + Send,
    {
        let last_event_id = self
            .api
            .describe_stack_events(request.stack_name, None)
            .await?
            .items
            .first()
            .map(|event| event.event_id.clone());

        info!("Updating stack {}", request.stack_name);

        let stack_id = self.api.update_stack(request).await?;
        let status = self
            .wait_for_stack(
                &stack_id,
                last_event_id.as_deref(),
                request.timeout_mins,
                on_event,
            )
            .await?;

        if status != "UPDATE_COMPLETE" {
            return Err(Error::StackFailed {
                stack: request.stack_name.to_string(),
                status,
            });
        }

        Ok(stack_id)
    }

    /// Deletes a stack without waiting for the deletion to finish.
    pub async fn delete_stack(&self, stack_id: &str) -> Result<()> {
        info!("Deleting stack {}", stack_id);
        self.api.delete_stack(stack_id).await
    }

    /// Reads event pages, newest first, until the page holding
    /// `last_event_id` or the last page.
    async fn events_until(
        &self,
        stack_name: &str,
        last_event_id: Option<&str>,
    ) -> Result<Vec<StackEvent>> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let page = self
                .api
                .describe_stack_events(stack_name, next_token.take())
                .await?;

            let found = last_event_id
                .is_some_and(|id| page.items.iter().any(|event| event.event_id == id));
            events.extend(page.items);

            match page.next_token {
                Some(token) if !found => next_token = Some(token),
                _ => break,
            }
        }

        Ok(events)
    }

    /// Polls a stack until its status leaves `*_IN_PROGRESS`, reporting new
    /// events along the way. Returns the final status.
    async fn wait_for_stack<F>(
        &self,
        stack_id: &str,
        last_event_id: Option<&str>,
        timeout_mins: u64,
        mut on_event: F,
    ) -> Result<String>
    where
        F: FnMut(&StackEvent) + Send,
    {
        let start = Instant::now();
        let timeout = Duration::from_secs(timeout_mins * 60) + WAIT_GRACE;
        let mut last_event_id = last_event_id.map(str::to_string);

        loop {
            let stack = self.lookup_stack(stack_id).await?;
            let events = self.events_until(stack_id, last_event_id.as_deref()).await?;

            for event in events_since(&events, last_event_id.as_deref()) {
                on_event(event);
            }

            if let Some(newest) = events.first() {
                last_event_id = Some(newest.event_id.clone());
            }

            if !stack.status.ends_with("IN_PROGRESS") {
                debug!("Stack {} finished with status {}", stack_id, stack.status);
                return Ok(stack.status);
            }

            if start.elapsed() >= timeout {
                return Err(Error::Timeout {
                    what: format!("the stack \"{}\"", stack.stack_name),
                    timeout_mins,
                });
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl<A: StackApi> StackSource for CloudFormation<A> {
    async fn lookup_stacks(
        &self,
        statuses: &[&str],
        tags: &IndexMap<String, String>,
    ) -> Result<Vec<StackInfo>> {
        CloudFormation::<A>::lookup_stacks(self, statuses, tags).await
    }
}

/// Returns the events newer than `last_event_id`, oldest first.
///
/// `events` must be ordered newest first, as CloudFormation returns them.
/// Without a known last event every event is new.
pub fn events_since<'e>(events: &'e [StackEvent], last_event_id: Option<&str>) -> Vec<&'e StackEvent> {
    let mut new_events: Vec<&StackEvent> = events
        .iter()
        .take_while(|event| Some(event.event_id.as_str()) != last_event_id)
        .collect();
    new_events.reverse();
    new_events
}

/// Returns whether a stack carries every required tag with the same value.
pub fn stack_has_tags(stack_tags: &IndexMap<String, String>, required: &IndexMap<String, String>) -> bool {
    required
        .iter()
        .all(|(name, value)| stack_tags.get(name) == Some(value))
}

fn stack_info(stack: &Stack) -> StackInfo {
    StackInfo {
        stack_id: text(stack.stack_id()).unwrap_or_default(),
        stack_name: text(stack.stack_name()).unwrap_or_default(),
        status: stack_status(stack.stack_status()),
        description: text(stack.description()),
        created: timestamp(stack.creation_time()),
        tags: stack
            .tags()
            .iter()
            .filter_map(|tag| Some((text(tag.key())?, text(tag.value()).unwrap_or_default())))
            .collect(),
        outputs: stack
            .outputs()
            .iter()
            .filter_map(|output| {
                Some((
                    text(output.output_key())?,
                    text(output.output_value()).unwrap_or_default(),
                ))
            })
            .collect(),
        parameters: stack
            .parameters()
            .iter()
            .filter_map(|param| {
                Some((
                    text(param.parameter_key())?,
                    text(param.parameter_value()).unwrap_or_default(),
                ))
            })
            .collect(),
    }
}

fn parameters(params: &IndexMap<String, String>) -> Vec<Parameter> {
    params
        .iter()
        .map(|(key, value)| {
            Parameter::builder()
                .parameter_key(key)
                .parameter_value(value)
                .build()
        })
        .collect()
}

fn tags(tags: &IndexMap<String, String>) -> Result<Vec<Tag>> {
    tags.iter()
        .map(|(key, value)| {
            Tag::builder()
                .key(key)
                .value(value)
                .build()
                .map_err(|e| Error::InvalidTag {
                    tag: key.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

/// Maps an `UpdateStack` failure, recognising updates with nothing to do.
fn update_error(message: Option<&str>, detail: String) -> Error {
    if message.is_some_and(|message| message.contains(NO_UPDATES_MESSAGE.trim_end_matches('.'))) {
        Error::StackUpdateNotRequired
    } else {
        Error::aws("UpdateStack", detail)
    }
}

fn stack_missing(message: Option<&str>) -> bool {
    message.is_some_and(|message| message.contains("does not exist"))
}

fn more(next_token: Option<&str>) -> Option<String> {
    next_token.filter(|token| !token.is_empty()).map(str::to_string)
}

fn text<'a>(value: impl Into<Option<&'a str>>) -> Option<String> {
    value.into().map(str::to_string)
}

fn stack_status<'a>(value: impl Into<Option<&'a StackStatus>>) -> String {
    value
        .into()
        .map(|status| status.as_str().to_string())
        .unwrap_or_default()
}

fn resource_status<'a>(value: impl Into<Option<&'a ResourceStatus>>) -> String {
    value
        .into()
        .map(|status| status.as_str().to_string())
        .unwrap_or_default()
}

fn timestamp<'a>(value: impl Into<Option<&'a AwsDateTime>>) -> Option<DateTime<Utc>> {
    value
        .into()
        .and_then(|time| DateTime::from_timestamp(time.secs(), time.subsec_nanos()))
}

/// Scripted [`StackApi`] for exercising the waiting logic offline.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays stack statuses and event listings, one per poll. The last
    /// entry of each script repeats once the script runs out.
    pub(crate) struct ScriptedStackApi {
        statuses: Mutex<VecDeque<String>>,
        event_listings: Mutex<VecDeque<Vec<StackEvent>>>,
        current_events: Mutex<Vec<StackEvent>>,
        page_size: usize,
        pub fail_describe: bool,
        pub fail_delete: bool,
        pub update_not_required: bool,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedStackApi {
        pub(crate) fn new(statuses: &[&str]) -> Self {
            Self {
                statuses: Mutex::new(statuses.iter().map(|s| s.to_string()).collect()),
                event_listings: Mutex::new(VecDeque::new()),
                current_events: Mutex::new(Vec::new()),
                page_size: 100,
                fail_describe: false,
                fail_delete: false,
                update_not_required: false,
                calls: Mutex::new(Vec::new()),
            }
        }

        /// Event listings, each newest first, returned by successive polls.
        pub(crate) fn with_events(self, listings: Vec<Vec<StackEvent>>) -> Self {
            *self.event_listings.lock().unwrap() = listings.into();
            self
        }

        pub(crate) fn with_page_size(mut self, page_size: usize) -> Self {
            self.page_size = page_size;
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    fn next<T: Clone>(script: &Mutex<VecDeque<T>>) -> Option<T> {
        let mut script = script.lock().unwrap();
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }

    #[async_trait]
    impl StackApi for ScriptedStackApi {
        async fn describe_stacks(&self, _next_token: Option<String>) -> Result<Page<StackInfo>> {
            self.record("describe_stacks".into());
            Ok(Page::default())
        }

        async fn describe_stack(&self, stack_name: &str) -> Result<Option<StackInfo>> {
            self.record(format!("describe_stack {}", stack_name));
            if self.fail_describe {
                return Err(Error::aws("DescribeStacks", "Rate exceeded"));
            }

            Ok(next(&self.statuses).map(|status| StackInfo {
                stack_id: stack_name.to_string(),
                stack_name: stack_name.to_string(),
                status,
                ..Default::default()
            }))
        }

        async fn describe_stack_events(
            &self,
            stack_name: &str,
            next_token: Option<String>,
        ) -> Result<Page<StackEvent>> {
            self.record(format!("describe_stack_events {}", stack_name));

            let start = match next_token {
                Some(token) => token.parse::<usize>().unwrap(),
                None => {
                    if let Some(listing) = next(&self.event_listings) {
                        *self.current_events.lock().unwrap() = listing;
                    }
                    0
                }
            };

            let events = self.current_events.lock().unwrap();
            let end = (start + self.page_size).min(events.len());
            Ok(Page {
                items: events[start..end].to_vec(),
                next_token: (end < events.len()).then(|| end.to_string()),
            })
        }

        async fn validate_template(&self, _template_body: &str) -> Result<Vec<TemplateParameter>> {
            Ok(Vec::new())
        }

        async fn create_stack(&self, request: &StackRequest<'_>) -> Result<String> {
            self.record(format!("create_stack {}", request.stack_name));
            Ok(format!("arn:aws:cloudformation:stack/{}", request.stack_name))
        }

        async fn update_stack(&self, request: &StackRequest<'_>) -> Result<String> {
            self.record(format!("update_stack {}", request.stack_name));
            if self.update_not_required {
                return Err(update_error(
                    Some("No updates are to be performed."),
                    "ValidationError".into(),
                ));
            }
            Ok(format!("arn:aws:cloudformation:stack/{}", request.stack_name))
        }

        async fn delete_stack(&self, stack_id: &str) -> Result<()> {
            self.record(format!("delete_stack {}", stack_id));
            if self.fail_delete {
                return Err(Error::aws("DeleteStack", "Access denied"));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedStackApi;
    use super::*;

    fn event(id: &str) -> StackEvent {
        StackEvent {
            event_id: id.to_string(),
            ..Default::default()
        }
    }

    fn ids(events: &[&StackEvent]) -> Vec<String> {
        events.iter().map(|event| event.event_id.clone()).collect()
    }

    #[test]
    fn test_events_since_returns_oldest_first() {
        let events = vec![event("e4"), event("e3"), event("e2"), event("e1")];

        assert_eq!(ids(&events_since(&events, Some("e2"))), vec!["e3", "e4"]);
        assert_eq!(ids(&events_since(&events, Some("e4"))), Vec::<String>::new());
        assert_eq!(
            ids(&events_since(&events, None)),
            vec!["e1", "e2", "e3", "e4"]
        );
    }

    #[test]
    fn test_events_since_unknown_id_returns_everything() {
        let events = vec![event("e2"), event("e1")];
        assert_eq!(ids(&events_since(&events, Some("gone"))), vec!["e1", "e2"]);
    }

    #[test]
    fn test_stack_has_tags() {
        let mut stack_tags = IndexMap::new();
        stack_tags.insert("GenericStackName".to_string(), "network".to_string());
        stack_tags.insert("Environment".to_string(), "prod".to_string());

        let mut required = IndexMap::new();
        assert!(stack_has_tags(&stack_tags, &required));

        required.insert("GenericStackName".to_string(), "network".to_string());
        assert!(stack_has_tags(&stack_tags, &required));

        required.insert("Environment".to_string(), "staging".to_string());
        assert!(!stack_has_tags(&stack_tags, &required));

        required.insert("Environment".to_string(), "prod".to_string());
        required.insert("Team".to_string(), "web".to_string());
        assert!(!stack_has_tags(&stack_tags, &required));
    }

    fn request<'a>(params: &'a IndexMap<String, String>) -> StackRequest<'a> {
        StackRequest {
            stack_name: "web",
            template_body: "{}",
            params,
            tags: params,
            rollback_on_error: true,
            timeout_mins: 30,
        }
    }

    fn client(api: ScriptedStackApi) -> CloudFormation<ScriptedStackApi> {
        CloudFormation::with_api(api).with_poll_interval(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_create_reports_events_oldest_first_across_polls() {
        let api = ScriptedStackApi::new(&["CREATE_IN_PROGRESS", "CREATE_COMPLETE"]).with_events(vec![
            vec![event("e2"), event("e1")],
            vec![event("e4"), event("e3"), event("e2"), event("e1")],
        ]);
        let cf = client(api);
        let params = IndexMap::new();

        let mut seen = Vec::new();
        let stack_id = cf
            .create_stack_and_wait(&request(&params), |event| seen.push(event.event_id.clone()))
            .await
            .unwrap();

        assert_eq!(stack_id, "arn:aws:cloudformation:stack/web");
        assert_eq!(seen, vec!["e1", "e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn test_failed_create() {
        let cf = client(ScriptedStackApi::new(&["CREATE_IN_PROGRESS", "ROLLBACK_COMPLETE"]));
        let params = IndexMap::new();

        let err = cf
            .create_stack_and_wait(&request(&params), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::StackFailed { ref stack, ref status } if stack == "web" && status == "ROLLBACK_COMPLETE"
        ));
    }

    #[tokio::test]
    async fn test_update_without_changes() {
        let mut api = ScriptedStackApi::new(&["UPDATE_COMPLETE"]);
        api.update_not_required = true;
        let cf = client(api);
        let params = IndexMap::new();

        let mut seen = 0;
        let err = cf
            .update_stack_and_wait(&request(&params), |_| seen += 1)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StackUpdateNotRequired));
        assert_eq!(seen, 0);
        assert!(!cf.api.calls().iter().any(|call| call.starts_with("describe_stack ")));
    }

    #[tokio::test]
    async fn test_update_reports_only_new_events() {
        let api = ScriptedStackApi::new(&["UPDATE_IN_PROGRESS", "UPDATE_COMPLETE"])
            .with_events(vec![
                vec![event("e2"), event("e1")],
                vec![event("e3"), event("e2"), event("e1")],
                vec![event("e5"), event("e4"), event("e3"), event("e2"), event("e1")],
            ])
            .with_page_size(2);
        let cf = client(api);
        let params = IndexMap::new();

        let mut seen = Vec::new();
        cf.update_stack_and_wait(&request(&params), |event| seen.push(event.event_id.clone()))
            .await
            .unwrap();

        assert_eq!(seen, vec!["e3", "e4", "e5"]);
    }

    #[tokio::test]
    async fn test_failed_update() {
        let cf = client(ScriptedStackApi::new(&["UPDATE_ROLLBACK_COMPLETE"]));
        let params = IndexMap::new();

        let err = cf
            .update_stack_and_wait(&request(&params), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StackFailed { ref status, .. } if status == "UPDATE_ROLLBACK_COMPLETE"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_gives_up_after_timeout_and_grace() {
        let cf = CloudFormation::with_api(ScriptedStackApi::new(&["CREATE_IN_PROGRESS"]))
            .with_poll_interval(Duration::from_secs(30));
        let params = IndexMap::new();
        let mut stack_request = request(&params);
        stack_request.timeout_mins = 1;

        let start = Instant::now();
        let err = cf
            .create_stack_and_wait(&stack_request, |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { timeout_mins: 1, .. }));
        assert!(start.elapsed() >= Duration::from_secs(6 * 60));
        assert!(start.elapsed() < Duration::from_secs(6 * 60 + 31));
    }

    #[tokio::test]
    async fn test_lookup_stack_events_reads_every_page() {
        let api = ScriptedStackApi::new(&["CREATE_COMPLETE"])
            .with_events(vec![vec![event("e3"), event("e2"), event("e1")]])
            .with_page_size(2);
        let cf = client(api);

        let events = cf.lookup_stack_events("web").await.unwrap();
        let ids: Vec<&str> = events.iter().map(|event| event.event_id.as_str()).collect();

        assert_eq!(ids, vec!["e3", "e2", "e1"]);
    }

    #[tokio::test]
    async fn test_lookup_missing_stack() {
        let cf = client(ScriptedStackApi::new(&[]));
        let err = cf.lookup_stack("gone").await.unwrap_err();
        assert_eq!(err.to_string(), "The stack \"gone\" was not found");
    }

    #[test]
    fn test_update_error() {
        assert!(matches!(
            update_error(Some("No updates are to be performed."), String::new()),
            Error::StackUpdateNotRequired
        ));
        assert!(matches!(
            update_error(Some("Template format error"), "ValidationError".into()),
            Error::Aws { ref operation, .. } if operation == "UpdateStack"
        ));
        assert!(stack_missing(Some("Stack with id web does not exist")));
        assert!(!stack_missing(None));
    }

    #[test]
    fn test_stack_output() {
        let mut stack = StackInfo::default();
        stack.outputs.insert("VpcId".to_string(), "vpc-123".to_string());
        assert_eq!(stack.output("VpcId"), Some("vpc-123"));
        assert_eq!(stack.output("SubnetId"), None);
    }
}
