//! Transition table and edge operators.
//!
//! The table maps a completed job type to an ordered list of edges. Each edge
//! is one of:
//!
//! - [`Edge::Direct`]: exactly one follow-up job.
//! - [`Edge::Switch`]: a key derived from (input, output) picks one case.
//!   An unmatched key emits nothing, unless the switch was built with
//!   [`Edge::or_abandon`], in which case its case targets are abandoned.
//! - [`Edge::Loop`]: one set of follow-up jobs per item of a list derived
//!   from the output.
//!
//! Evaluation ([`TransitionTable::next_jobs`]) is a pure function of
//! (job type, input, output). Creating documents and submitting jobs is
//! left to the dispatcher, which materializes the returned [`NextJob`]s.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;

use tracing::{debug, trace};

use docflow_core::payloads::{DocumentChunk, ExtractedFile};
use docflow_core::{
    validate_input, validate_output, Document, Error, JobInput, JobOutput, JobType, NewDocument,
    Result,
};

/// One element of a loop edge's item list.
///
/// Items are zipped records, so a transition never has to line up
/// several parallel lists by position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopItem {
    /// A file unpacked from an archive, with its inferred doctype.
    ArchiveMember(ExtractedFile),
    /// A page range cut from a paginated document.
    Chunk(DocumentChunk),
    /// An image referenced from extracted HTML.
    EmbeddedImage(PathBuf),
}

/// What a transition function asks the dispatcher to start.
#[derive(Debug, Clone, PartialEq)]
pub enum Spawn {
    /// Submit a job with this input.
    Run(JobInput),
    /// Create a document, then submit its entry job.
    CreateDocument(NewDocument),
    /// Run nothing: fail the target cell and every cell downstream of it,
    /// with this reason.
    Abandon(String),
}

/// One follow-up produced by [`TransitionTable::next_jobs`].
#[derive(Debug, Clone, PartialEq)]
pub struct NextJob {
    pub job_type: JobType,
    pub spawn: Spawn,
}

/// What a transition function sees.
#[derive(Debug, Clone, Copy)]
pub struct TransitionContext<'a> {
    /// Job type the transition produces.
    pub target: JobType,
    pub input: &'a JobInput,
    pub output: &'a JobOutput,
    /// Index and item when evaluated inside a loop edge.
    pub item: Option<(usize, &'a LoopItem)>,
}

impl<'a> TransitionContext<'a> {
    /// The current loop item, a contract violation outside a loop.
    pub fn loop_item(&self) -> Result<&'a LoopItem> {
        self.item.map(|(_, item)| item).ok_or_else(|| {
            Error::Contract(format!(
                "Transition to {} needs a loop item but was evaluated outside a loop",
                self.target
            ))
        })
    }

    /// Contract violation for a payload the transition did not expect.
    pub fn unexpected(&self, what: &str) -> Error {
        Error::Contract(format!(
            "Transition {} -> {} cannot use {}",
            self.input.job_type(),
            self.target,
            what
        ))
    }
}

pub type BuildFn = fn(&TransitionContext<'_>) -> Result<Spawn>;
pub type KeyFn = fn(&JobInput, &JobOutput) -> Result<String>;
pub type ItemsFn = fn(&JobInput, &JobOutput) -> Result<Vec<LoopItem>>;
pub type EntryFn = fn(&Document) -> Result<JobInput>;

/// A single-job transition.
#[derive(Debug, Clone, Copy)]
pub struct Direct {
    pub target: JobType,
    pub build: BuildFn,
}

impl Direct {
    pub fn new(target: JobType, build: BuildFn) -> Self {
        Self { target, build }
    }

    fn evaluate(
        &self,
        input: &JobInput,
        output: &JobOutput,
        item: Option<(usize, &LoopItem)>,
    ) -> Result<NextJob> {
        let ctx = TransitionContext {
            target: self.target,
            input,
            output,
            item,
        };
        let spawn = (self.build)(&ctx)?;
        if let Spawn::Run(ref next) = spawn {
            if next.job_type() != self.target {
                return Err(Error::Contract(format!(
                    "Transition to {} built a {} input",
                    self.target,
                    next.job_type()
                )));
            }
        }
        Ok(NextJob {
            job_type: self.target,
            spawn,
        })
    }
}

/// Edge descriptor.
#[derive(Debug, Clone)]
pub enum Edge {
    Direct(Direct),
    Switch {
        name: &'static str,
        key: KeyFn,
        cases: BTreeMap<String, Vec<Direct>>,
        /// Reason recorded on the case targets when no case matches.
        unmatched: Option<&'static str>,
    },
    Loop {
        name: &'static str,
        items: ItemsFn,
        directs: Vec<Direct>,
    },
}

impl Edge {
    pub fn direct(target: JobType, build: BuildFn) -> Self {
        Edge::Direct(Direct::new(target, build))
    }

    pub fn switch<K: Into<String>>(
        name: &'static str,
        key: KeyFn,
        cases: impl IntoIterator<Item = (K, Vec<Direct>)>,
    ) -> Self {
        Edge::Switch {
            name,
            key,
            cases: cases.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            unmatched: None,
        }
    }

    /// Abandon every case target when a switch key matches no case.
    ///
    /// Without this the branch just ends and the target cells stay pending.
    pub fn or_abandon(self, reason: &'static str) -> Self {
        match self {
            Edge::Switch {
                name, key, cases, ..
            } => Edge::Switch {
                name,
                key,
                cases,
                unmatched: Some(reason),
            },
            other => other,
        }
    }

    pub fn loop_over(name: &'static str, items: ItemsFn, directs: Vec<Direct>) -> Self {
        Edge::Loop {
            name,
            items,
            directs,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Edge::Direct(_) => "direct",
            Edge::Switch { .. } => "switch",
            Edge::Loop { .. } => "loop",
        }
    }

    /// Every job type this edge can produce.
    pub fn targets(&self) -> BTreeSet<JobType> {
        match self {
            Edge::Direct(d) => BTreeSet::from([d.target]),
            Edge::Switch { cases, .. } => cases.values().flatten().map(|d| d.target).collect(),
            Edge::Loop { directs, .. } => directs.iter().map(|d| d.target).collect(),
        }
    }

    fn evaluate(
        &self,
        source: JobType,
        input: &JobInput,
        output: &JobOutput,
        out: &mut Vec<NextJob>,
    ) -> Result<()> {
        match self {
            Edge::Direct(direct) => {
                out.push(direct.evaluate(input, output, None)?);
                debug!(
                    subsystem = "jobs",
                    component = "transitions",
                    job_type = %source,
                    edge = "direct",
                    target = %direct.target,
                    "Edge evaluated"
                );
            }
            Edge::Switch {
                name,
                key,
                cases,
                unmatched,
            } => {
                let selected = key(input, output)?;
                match cases.get(&selected) {
                    Some(directs) => {
                        for direct in directs {
                            out.push(direct.evaluate(input, output, None)?);
                        }
                        debug!(
                            subsystem = "jobs",
                            component = "transitions",
                            job_type = %source,
                            edge = "switch",
                            switch = name,
                            switch_key = %selected,
                            fan_out = directs.len(),
                            "Switch case selected"
                        );
                    }
                    None => match unmatched {
                        Some(reason) => {
                            let targets: BTreeSet<JobType> =
                                cases.values().flatten().map(|d| d.target).collect();
                            debug!(
                                subsystem = "jobs",
                                component = "transitions",
                                job_type = %source,
                                edge = "switch",
                                switch = name,
                                switch_key = %selected,
                                abandoned = targets.len(),
                                "No switch case matches, abandoning case targets"
                            );
                            out.extend(targets.into_iter().map(|target| NextJob {
                                job_type: target,
                                spawn: Spawn::Abandon(format!("{} ({}={})", reason, name, selected)),
                            }));
                        }
                        None => debug!(
                            subsystem = "jobs",
                            component = "transitions",
                            job_type = %source,
                            edge = "switch",
                            switch = name,
                            switch_key = %selected,
                            "No switch case matches, branch ends here"
                        ),
                    },
                }
            }
            Edge::Loop {
                name,
                items,
                directs,
            } => {
                let items = items(input, output)?;
                for (index, item) in items.iter().enumerate() {
                    trace!(
                        subsystem = "jobs",
                        component = "transitions",
                        job_type = %source,
                        edge = "loop",
                        index,
                        ?item,
                        "Loop item"
                    );
                    for direct in directs {
                        out.push(direct.evaluate(input, output, Some((index, item)))?);
                    }
                }
                debug!(
                    subsystem = "jobs",
                    component = "transitions",
                    job_type = %source,
                    edge = "loop",
                    loop_over = name,
                    items = items.len(),
                    fan_out = items.len() * directs.len(),
                    "Loop expanded"
                );
            }
        }
        Ok(())
    }
}

/// Entry transition taken when a document enters the graph.
#[derive(Debug, Clone, Copy)]
pub struct EntryEdge {
    pub target: JobType,
    pub build: EntryFn,
}

/// Static map from completed job type to its outgoing edges.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    entry: EntryEdge,
    edges: BTreeMap<JobType, Vec<Edge>>,
    terminal: BTreeSet<JobType>,
}

impl TransitionTable {
    pub fn builder(entry_target: JobType, entry_build: EntryFn) -> TransitionTableBuilder {
        TransitionTableBuilder {
            entry: EntryEdge {
                target: entry_target,
                build: entry_build,
            },
            edges: BTreeMap::new(),
            terminal: BTreeSet::new(),
        }
    }

    /// Follow-up jobs for a successful completion of `job_type`.
    ///
    /// Fails fast with `Error::Contract` when the payloads are not the
    /// declared types or when `job_type` was never registered.
    pub fn next_jobs(
        &self,
        job_type: JobType,
        input: &JobInput,
        output: &JobOutput,
    ) -> Result<Vec<NextJob>> {
        validate_input(job_type, input)?;
        validate_output(job_type, output)?;

        let Some(edges) = self.edges.get(&job_type) else {
            if self.terminal.contains(&job_type) {
                return Ok(Vec::new());
            }
            return Err(Error::Contract(format!(
                "No transitions registered for {}",
                job_type
            )));
        };

        let mut next = Vec::new();
        for edge in edges {
            edge.evaluate(job_type, input, output, &mut next)?;
        }
        Ok(next)
    }

    /// First job of a freshly created document.
    pub fn entry_job(&self, document: &Document) -> Result<NextJob> {
        let input = (self.entry.build)(document)?;
        validate_input(self.entry.target, &input)?;
        Ok(NextJob {
            job_type: self.entry.target,
            spawn: Spawn::Run(input),
        })
    }

    pub fn entry_target(&self) -> JobType {
        self.entry.target
    }

    pub fn edges(&self, job_type: JobType) -> &[Edge] {
        self.edges.get(&job_type).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_terminal(&self, job_type: JobType) -> bool {
        self.terminal.contains(&job_type)
    }

    /// Check that every job type either has edges or is declared terminal.
    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = JobType::ALL
            .iter()
            .copied()
            .filter(|jt| !self.edges.contains_key(jt) && !self.terminal.contains(jt))
            .map(|jt| jt.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Contract(format!(
                "Job types with neither transitions nor a terminal declaration: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Job types reachable from the entry job, in breadth-first order.
    pub fn reachable(&self) -> Vec<JobType> {
        self.reachable_from(self.entry.target)
    }

    /// `start` followed by every job type reachable from it, breadth-first.
    pub fn reachable_from(&self, start: JobType) -> Vec<JobType> {
        let mut seen = BTreeSet::from([start]);
        let mut order = vec![start];
        let mut cursor = 0;
        while cursor < order.len() {
            let current = order[cursor];
            cursor += 1;
            for edge in self.edges(current) {
                for target in edge.targets() {
                    if seen.insert(target) {
                        order.push(target);
                    }
                }
            }
        }
        order
    }

    /// Human-readable listing, one source job type per block.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "(document created) -> {}", self.entry.target);
        for (source, edges) in &self.edges {
            let _ = writeln!(out, "{}", source);
            for edge in edges {
                match edge {
                    Edge::Direct(d) => {
                        let _ = writeln!(out, "  direct -> {}", d.target);
                    }
                    Edge::Switch {
                        name,
                        cases,
                        unmatched,
                        ..
                    } => {
                        let _ = writeln!(out, "  switch on {}", name);
                        for (key, directs) in cases {
                            let _ = writeln!(out, "    {} -> {}", key, join_targets(directs));
                        }
                        if let Some(reason) = unmatched {
                            let _ = writeln!(out, "    (other) -> abandon: {}", reason);
                        }
                    }
                    Edge::Loop { name, directs, .. } => {
                        let _ = writeln!(out, "  loop over {} -> {}", name, join_targets(directs));
                    }
                }
            }
        }
        let terminal: Vec<&str> = self.terminal.iter().map(|jt| jt.as_str()).collect();
        let _ = writeln!(out, "terminal: {}", terminal.join(", "));
        out
    }

    /// Graphviz rendering of the table.
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph ingestion {\n  rankdir=LR;\n");
        let _ = writeln!(out, "  upload [shape=box];");
        let _ = writeln!(out, "  upload -> {};", self.entry.target);
        for jt in &self.terminal {
            let _ = writeln!(out, "  {} [peripheries=2];", jt);
        }
        for (source, edges) in &self.edges {
            for edge in edges {
                match edge {
                    Edge::Direct(d) => {
                        let _ = writeln!(out, "  {} -> {};", source, d.target);
                    }
                    Edge::Switch { cases, .. } => {
                        for (key, directs) in cases {
                            for d in directs {
                                let _ = writeln!(
                                    out,
                                    "  {} -> {} [label=\"{}\", style=dashed];",
                                    source, d.target, key
                                );
                            }
                        }
                    }
                    Edge::Loop { name, directs, .. } => {
                        for d in directs {
                            let _ = writeln!(
                                out,
                                "  {} -> {} [label=\"each {}\", style=bold];",
                                source, d.target, name
                            );
                        }
                    }
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

fn join_targets(directs: &[Direct]) -> String {
    directs
        .iter()
        .map(|d| d.target.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Builder for [`TransitionTable`].
pub struct TransitionTableBuilder {
    entry: EntryEdge,
    edges: BTreeMap<JobType, Vec<Edge>>,
    terminal: BTreeSet<JobType>,
}

impl TransitionTableBuilder {
    /// Append an edge leaving `source`.
    pub fn on(mut self, source: JobType, edge: Edge) -> Self {
        self.edges.entry(source).or_default().push(edge);
        self
    }

    /// Declare job types that start nothing.
    pub fn terminal(mut self, job_types: impl IntoIterator<Item = JobType>) -> Self {
        self.terminal.extend(job_types);
        self
    }

    /// Build the table, rejecting structurally broken registrations.
    pub fn build(self) -> Result<TransitionTable> {
        for (source, edges) in &self.edges {
            if self.terminal.contains(source) {
                return Err(Error::Contract(format!(
                    "{} is declared terminal but has transitions",
                    source
                )));
            }
            for edge in edges {
                let empty = match edge {
                    Edge::Direct(_) => false,
                    Edge::Switch { cases, .. } => {
                        cases.is_empty() || cases.values().any(Vec::is_empty)
                    }
                    Edge::Loop { directs, .. } => directs.is_empty(),
                };
                if empty {
                    return Err(Error::Contract(format!(
                        "{} has a {} edge with no targets",
                        source,
                        edge.kind()
                    )));
                }
            }
        }
        Ok(TransitionTable {
            entry: self.entry,
            edges: self.edges,
            terminal: self.terminal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_core::payloads::{
        DetectLanguageOutput, EsIndexInput, EsIndexOutput, ExtractArchiveInput,
        ExtractArchiveOutput, ExtractPlainTextInput, ExtractPlainTextOutput, SdocInitInput,
    };
    use docflow_core::{DocType, SdocRef};
    use uuid::Uuid;

    fn sdoc() -> SdocRef {
        SdocRef {
            project_id: Uuid::nil(),
            document_id: Uuid::from_u128(1),
            folder_id: None,
        }
    }

    fn init(doc: &Document) -> Result<JobInput> {
        Ok(JobInput::SdocInit(SdocInitInput {
            sdoc: doc.sdoc_ref(),
            doctype: doc.doctype,
            file_path: doc.file_path.clone(),
        }))
    }

    fn index(ctx: &TransitionContext<'_>) -> Result<Spawn> {
        let (JobInput::ExtractPlainText(input), JobOutput::ExtractPlainText(output)) =
            (ctx.input, ctx.output)
        else {
            return Err(ctx.unexpected("payload"));
        };
        Ok(Spawn::Run(JobInput::EsIndex(EsIndexInput {
            sdoc: input.sdoc,
            doctype: input.doctype,
            text: output.text.clone(),
        })))
    }

    fn wrong_type(ctx: &TransitionContext<'_>) -> Result<Spawn> {
        let JobInput::ExtractPlainText(input) = ctx.input else {
            return Err(ctx.unexpected("payload"));
        };
        Ok(Spawn::Run(JobInput::ExtractPlainText(input.clone())))
    }

    fn member(ctx: &TransitionContext<'_>) -> Result<Spawn> {
        let JobInput::ExtractArchive(input) = ctx.input else {
            return Err(ctx.unexpected("payload"));
        };
        match ctx.loop_item()? {
            LoopItem::ArchiveMember(file) => Ok(Spawn::CreateDocument(
                NewDocument::new(input.project_id, file.doctype, file.path.clone())
                    .in_folder(input.folder_id),
            )),
            other => Err(ctx.unexpected(&format!("{:?}", other))),
        }
    }

    fn members(_: &JobInput, output: &JobOutput) -> Result<Vec<LoopItem>> {
        match output {
            JobOutput::ExtractArchive(o) => {
                Ok(o.files.iter().cloned().map(LoopItem::ArchiveMember).collect())
            }
            _ => Err(Error::Contract("expected archive output".into())),
        }
    }

    fn plain_text_pair() -> (JobInput, JobOutput) {
        (
            JobInput::ExtractPlainText(ExtractPlainTextInput {
                sdoc: sdoc(),
                doctype: DocType::Text,
                html: "<p>hi</p>".into(),
            }),
            JobOutput::ExtractPlainText(ExtractPlainTextOutput {
                text: "hi".into(),
                html: "<p>hi</p>".into(),
            }),
        )
    }

    #[test]
    fn test_direct_edge_builds_target_input() {
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .on(JobType::ExtractPlainText, Edge::direct(JobType::EsIndex, index))
            .build()
            .unwrap();
        let (input, output) = plain_text_pair();

        let next = table.next_jobs(JobType::ExtractPlainText, &input, &output).unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].job_type, JobType::EsIndex);
        assert!(matches!(&next[0].spawn, Spawn::Run(JobInput::EsIndex(i)) if i.text == "hi"));
    }

    #[test]
    fn test_direct_edge_with_mismatched_input_is_contract_violation() {
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .on(JobType::ExtractPlainText, Edge::direct(JobType::EsIndex, wrong_type))
            .build()
            .unwrap();
        let (input, output) = plain_text_pair();
        let err = table
            .next_jobs(JobType::ExtractPlainText, &input, &output)
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_unregistered_job_type_is_contract_violation() {
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .build()
            .unwrap();
        let (input, output) = plain_text_pair();
        let err = table
            .next_jobs(JobType::ExtractPlainText, &input, &output)
            .unwrap_err();
        assert!(err.is_contract_violation());
        assert!(table.validate().is_err());
    }

    #[test]
    fn test_terminal_job_type_yields_nothing() {
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .terminal([JobType::EsIndex])
            .build()
            .unwrap();
        let input = JobInput::EsIndex(EsIndexInput {
            sdoc: sdoc(),
            doctype: DocType::Text,
            text: "x".into(),
        });
        let output = JobOutput::EsIndex(EsIndexOutput {
            index: "docs".into(),
        });
        assert!(table.next_jobs(JobType::EsIndex, &input, &output).unwrap().is_empty());
    }

    #[test]
    fn test_payload_of_wrong_type_fails_fast() {
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .terminal([JobType::EsIndex])
            .build()
            .unwrap();
        let (input, _) = plain_text_pair();
        let output = JobOutput::DetectLanguage(DetectLanguageOutput {
            language: "en".into(),
        });
        let err = table.next_jobs(JobType::EsIndex, &input, &output).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_switch_without_matching_case_emits_nothing() {
        fn lang(_: &JobInput, _: &JobOutput) -> Result<String> {
            Ok("xx".into())
        }
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .on(
                JobType::ExtractPlainText,
                Edge::switch("lang", lang, [("en", vec![Direct::new(JobType::EsIndex, index)])]),
            )
            .build()
            .unwrap();
        let (input, output) = plain_text_pair();
        assert!(table
            .next_jobs(JobType::ExtractPlainText, &input, &output)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_unmatched_switch_can_abandon_case_targets() {
        fn lang(_: &JobInput, _: &JobOutput) -> Result<String> {
            Ok("xx".into())
        }
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .on(
                JobType::ExtractPlainText,
                Edge::switch("lang", lang, [("en", vec![Direct::new(JobType::EsIndex, index)])])
                    .or_abandon("unsupported"),
            )
            .terminal([JobType::EsIndex])
            .build()
            .unwrap();
        let (input, output) = plain_text_pair();
        let next = table.next_jobs(JobType::ExtractPlainText, &input, &output).unwrap();

        assert_eq!(next.len(), 1);
        assert_eq!(next[0].job_type, JobType::EsIndex);
        assert_eq!(next[0].spawn, Spawn::Abandon("unsupported (lang=xx)".into()));
        assert!(table.describe().contains("(other) -> abandon: unsupported"));
    }

    #[test]
    fn test_reachable_from_follows_edges() {
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .on(JobType::ExtractPlainText, Edge::direct(JobType::EsIndex, index))
            .terminal([JobType::EsIndex])
            .build()
            .unwrap();
        assert_eq!(
            table.reachable_from(JobType::ExtractPlainText),
            vec![JobType::ExtractPlainText, JobType::EsIndex]
        );
        assert_eq!(table.reachable_from(JobType::EsIndex), vec![JobType::EsIndex]);
        assert_eq!(table.reachable(), vec![JobType::SdocInit]);
    }

    #[test]
    fn test_loop_edge_zips_items_with_doctypes() {
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .on(
                JobType::ExtractArchive,
                Edge::loop_over("files", members, vec![Direct::new(JobType::SdocInit, member)]),
            )
            .build()
            .unwrap();
        let input = JobInput::ExtractArchive(ExtractArchiveInput {
            project_id: Uuid::nil(),
            folder_id: Some(Uuid::from_u128(3)),
            archive_path: "a.zip".into(),
        });
        let doctypes = [DocType::Text, DocType::Image, DocType::Text];
        let output = JobOutput::ExtractArchive(ExtractArchiveOutput {
            files: doctypes
                .iter()
                .enumerate()
                .map(|(i, dt)| ExtractedFile {
                    path: format!("a/{i}").into(),
                    doctype: *dt,
                })
                .collect(),
        });

        let next = table.next_jobs(JobType::ExtractArchive, &input, &output).unwrap();
        let created: Vec<(DocType, PathBuf)> = next
            .iter()
            .map(|n| match &n.spawn {
                Spawn::CreateDocument(doc) => (doc.doctype, doc.file_path.clone()),
                other => panic!("unexpected spawn {other:?}"),
            })
            .collect();
        assert_eq!(
            created,
            vec![
                (DocType::Text, "a/0".into()),
                (DocType::Image, "a/1".into()),
                (DocType::Text, "a/2".into()),
            ]
        );
    }

    #[test]
    fn test_loop_item_outside_loop_is_contract_violation() {
        let table = TransitionTable::builder(JobType::SdocInit, init)
            .on(JobType::ExtractArchive, Edge::direct(JobType::SdocInit, member))
            .build()
            .unwrap();
        let input = JobInput::ExtractArchive(ExtractArchiveInput {
            project_id: Uuid::nil(),
            folder_id: None,
            archive_path: "a.zip".into(),
        });
        let output = JobOutput::ExtractArchive(ExtractArchiveOutput { files: vec![] });
        let err = table
            .next_jobs(JobType::ExtractArchive, &input, &output)
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_builder_rejects_terminal_with_edges_and_empty_cases() {
        let both = TransitionTable::builder(JobType::SdocInit, init)
            .on(JobType::ExtractPlainText, Edge::direct(JobType::EsIndex, index))
            .terminal([JobType::ExtractPlainText])
            .build();
        assert!(both.unwrap_err().is_contract_violation());

        let empty_loop = TransitionTable::builder(JobType::SdocInit, init)
            .on(JobType::ExtractArchive, Edge::loop_over("files", members, vec![]))
            .build();
        assert!(empty_loop.unwrap_err().is_contract_violation());
    }
}
