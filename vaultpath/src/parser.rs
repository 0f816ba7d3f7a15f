//! Logical path parser using nom
//!
//! Turns a storage path back into the entity or index it denotes.

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::char,
    combinator::{eof, map, opt, peek, rest, value, verify},
    sequence::{delimited, preceded, terminated},
};

use crate::error::ParseError;
use crate::{EntityKind, ParsedPath, INDEX_PREFIX, PROJECTS_DIR};

/// Name of the id index once the `_` prefix and `.json` suffix are stripped
const ID_INDEX_NAME: &str = "index";

/// Parse a complete logical path
pub fn parse_path(input: &str) -> Result<ParsedPath, ParseError> {
    let input = input.trim().trim_end_matches('/');
    let (remaining, parsed) = path(input)?;

    if !remaining.is_empty() {
        return Err(
            ParseError::new(format!("Unexpected trailing content: {}", remaining))
                .with_position(input.len() - remaining.len()),
        );
    }

    Ok(parsed)
}

enum Member<'a> {
    Index(&'a str),
    Entity(&'a str, Option<&'a str>),
}

fn path(input: &str) -> IResult<&str, ParsedPath> {
    let (input, _) = terminated(tag(PROJECTS_DIR), boundary)(input)?;

    let (input, project) = opt(preceded(char('/'), terminated(identifier, boundary)))(input)?;
    let project = match project {
        Some(project) => project.to_string(),
        None => return Ok((input, ParsedPath::Root)),
    };

    let (input, kind) = opt(preceded(char('/'), entity_kind))(input)?;
    let kind = match kind {
        Some(kind) => kind,
        None => return Ok((input, ParsedPath::Project { project })),
    };

    let (input, member) = opt(preceded(char('/'), alt((index_member, entity_member))))(input)?;

    let parsed = match member {
        None => ParsedPath::KindDir { project, kind },
        Some(Member::Index(name)) if name == ID_INDEX_NAME => ParsedPath::IdIndex { project, kind },
        Some(Member::Index(name)) => ParsedPath::InvertedIndex {
            project,
            kind,
            name: name.to_string(),
        },
        Some(Member::Entity(id, None)) => ParsedPath::EntityDir {
            project,
            kind,
            id: id.to_string(),
        },
        Some(Member::Entity(id, Some(file))) if file == kind.file_name() => ParsedPath::Entity {
            project,
            kind,
            id: id.to_string(),
        },
        Some(Member::Entity(id, Some(file))) => ParsedPath::Attachment {
            project,
            kind,
            id: id.to_string(),
            name: file.to_string(),
        },
    };

    Ok((input, parsed))
}

// ============================================================================
// Segments
// ============================================================================

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-')(input)
}

/// Entity ids never start with the index prefix
fn entity_id(input: &str) -> IResult<&str, &str> {
    verify(identifier, |s: &str| !s.starts_with(INDEX_PREFIX))(input)
}

/// A segment must end at `/` or at the end of input
fn boundary(input: &str) -> IResult<&str, ()> {
    peek(alt((value((), char('/')), value((), eof))))(input)
}

fn entity_kind(input: &str) -> IResult<&str, EntityKind> {
    terminated(
        alt((
            value(EntityKind::Test, tag(EntityKind::Test.dir_name())),
            value(EntityKind::Execution, tag(EntityKind::Execution.dir_name())),
            value(EntityKind::Recording, tag(EntityKind::Recording.dir_name())),
            value(EntityKind::Environment, tag(EntityKind::Environment.dir_name())),
        )),
        boundary,
    )(input)
}

fn index_member(input: &str) -> IResult<&str, Member<'_>> {
    map(
        terminated(delimited(char(INDEX_PREFIX), identifier, tag(".json")), eof),
        Member::Index,
    )(input)
}

fn entity_member(input: &str) -> IResult<&str, Member<'_>> {
    let (input, id) = terminated(entity_id, boundary)(input)?;
    let (input, file) = opt(preceded(char('/'), verify(rest, is_safe_relative)))(input)?;
    Ok((input, Member::Entity(id, file)))
}

fn is_safe_relative(s: &str) -> bool {
    !s.is_empty()
        && s
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root_and_project() {
        assert_eq!(parse_path("projects").unwrap(), ParsedPath::Root);
        assert_eq!(
            parse_path("projects/p1/").unwrap(),
            ParsedPath::Project { project: "p1".into() }
        );
    }

    #[test]
    fn test_parse_kind_dir() {
        assert_eq!(
            parse_path("projects/p1/recordings").unwrap(),
            ParsedPath::KindDir {
                project: "p1".into(),
                kind: EntityKind::Recording
            }
        );
    }

    #[test]
    fn test_parse_indexes() {
        assert_eq!(
            parse_path("projects/3/tests/_index.json").unwrap(),
            ParsedPath::IdIndex {
                project: "3".into(),
                kind: EntityKind::Test
            }
        );
        assert_eq!(
            parse_path("projects/3/executions/_by_test.json").unwrap(),
            ParsedPath::InvertedIndex {
                project: "3".into(),
                kind: EntityKind::Execution,
                name: "by_test".into()
            }
        );
    }

    #[test]
    fn test_parse_entity_and_attachment() {
        assert_eq!(
            parse_path("projects/3/tests/7/test.json").unwrap(),
            ParsedPath::Entity {
                project: "3".into(),
                kind: EntityKind::Test,
                id: "7".into()
            }
        );
        assert_eq!(
            parse_path("projects/3/tests/7").unwrap(),
            ParsedPath::EntityDir {
                project: "3".into(),
                kind: EntityKind::Test,
                id: "7".into()
            }
        );
        assert_eq!(
            parse_path("projects/3/recordings/s-1/screenshots/4.png").unwrap(),
            ParsedPath::Attachment {
                project: "3".into(),
                kind: EntityKind::Recording,
                id: "s-1".into(),
                name: "screenshots/4.png".into()
            }
        );
    }

    #[test]
    fn test_rejects_unknown_shapes() {
        assert!(parse_path("/projects/p1").is_err());
        assert!(parse_path("projectsx/p1").is_err());
        assert!(parse_path("projects/p1/widgets").is_err());
        assert!(parse_path("projects/p1/testsx").is_err());
        assert!(parse_path("projects/p1/tests/_index.yaml").is_err());
        assert!(parse_path("projects/p1/tests/7/../../secret").is_err());
        assert!(parse_path("projects/../etc").is_err());
    }
}
