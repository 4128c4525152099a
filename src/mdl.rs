//! A lightweight [`Toolkit`] for MDL text formats and SMILES.
//!
//! This reader understands just enough of molfiles (V2000 and V3000),
//! SD files, V2000 rxnfiles and SMILES to pull out atoms, bonds, titles and
//! SD data items. Charges, isotopes and stereo are ignored, and explicit
//! hydrogens are dropped before encoding.
//!
//! The exact-match key does not depend on atom order: atoms are labelled by
//! iterated neighbourhood refinement and the key hashes the sorted labels
//! and labelled bonds. Aromatic bonds only match aromatic bonds, so a
//! Kekulé drawing and an aromatic SMILES of one ring get different keys.
//! Keys are persisted and use FNV-1a over explicit bytes.
//!
//! The screening fingerprint is a count ladder over elements and bonded
//! element pairs, which is monotone under substructure and therefore safe
//! for prefiltering.

use std::{
    collections::{BTreeMap, HashSet},
    hash::Hasher,
    ops::Range,
    path::Path,
};

use fnv::FnvHasher;

use crate::{
    error::{Error, Result},
    toolkit::{
        EncodedStructure,
        FileFormat,
        ParsedStructure,
        StructureKind,
        Toolkit,
    },
};

const SDF_DELIMITER: &str = "$$$$";
const MOL_END: &str = "M  END";
const HYDROGEN: &str = "H";
const AROMATIC: u8 = 4;

#[derive(Debug, Default, Clone, Copy)]
pub struct MdlToolkit;

/// Atoms and bonds read from a connection table.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct ConnectionTable {
    atoms: Vec<String>,
    /// (first atom, second atom, order); atoms are 1-based as in the file.
    bonds: Vec<(usize, usize, u8)>,
}

/// Heavy atoms of a table with their bonded neighbours, 0-based.
struct Graph<'a> {
    elements: Vec<&'a str>,
    neighbours: Vec<Vec<(usize, u8)>>,
}

fn stable_hash(write: impl FnOnce(&mut FnvHasher)) -> u64 {
    let mut hasher = FnvHasher::default();
    write(&mut hasher);
    hasher.finish()
}

fn distinct(labels: &[u64]) -> usize {
    labels.iter().collect::<HashSet<_>>().len()
}

fn bond_symbol(order: u8) -> char {
    match order {
        1 => '-',
        2 => '=',
        3 => '#',
        AROMATIC => ':',
        _ => '~',
    }
}

impl ConnectionTable {
    fn heavy_graph(&self) -> Graph<'_> {
        let mut position = vec![None; self.atoms.len()];
        let mut elements = Vec::new();
        for (i, atom) in self.atoms.iter().enumerate() {
            if atom != HYDROGEN {
                position[i] = Some(elements.len());
                elements.push(atom.as_str());
            }
        }

        let mut neighbours = vec![Vec::new(); elements.len()];
        let heavy = |atom: usize| {
            atom.checked_sub(1)
                .and_then(|i| position.get(i).copied().flatten())
        };
        for &(a, b, order) in &self.bonds {
            if let (Some(a), Some(b)) = (heavy(a), heavy(b)) {
                neighbours[a].push((b, order));
                neighbours[b].push((a, order));
            }
        }
        Graph {
            elements,
            neighbours,
        }
    }

    /// Hash of the table that ignores atom order.
    fn canonical_hash(&self) -> u64 {
        let graph = self.heavy_graph();
        let mut labels: Vec<u64> = graph
            .elements
            .iter()
            .zip(&graph.neighbours)
            .map(|(element, around)| {
                stable_hash(|h| {
                    h.write(element.as_bytes());
                    h.write(&[0xff]);
                    h.write(&(around.len() as u64).to_le_bytes());
                })
            })
            .collect();

        let mut classes = distinct(&labels);
        for _ in 0..graph.elements.len() {
            let refined: Vec<u64> = graph
                .neighbours
                .iter()
                .enumerate()
                .map(|(i, around)| {
                    let mut seen: Vec<(u8, u64)> = around
                        .iter()
                        .map(|&(j, order)| (order, labels[j]))
                        .collect();
                    seen.sort_unstable();
                    stable_hash(|h| {
                        h.write(&labels[i].to_le_bytes());
                        for (order, label) in seen {
                            h.write(&[order]);
                            h.write(&label.to_le_bytes());
                        }
                    })
                })
                .collect();
            labels = refined;
            let refined_classes = distinct(&labels);
            if refined_classes <= classes {
                break;
            }
            classes = refined_classes;
        }

        let mut bonds: Vec<(u64, u64, u8)> = Vec::new();
        for (a, around) in graph.neighbours.iter().enumerate() {
            for &(b, order) in around.iter().filter(|&&(b, _)| a < b) {
                let low = labels[a].min(labels[b]);
                let high = labels[a].max(labels[b]);
                bonds.push((low, high, order));
            }
        }
        bonds.sort_unstable();
        labels.sort_unstable();

        stable_hash(|h| {
            for label in &labels {
                h.write(&label.to_le_bytes());
            }
            h.write(&[0xff]);
            for (low, high, order) in &bonds {
                h.write(&low.to_le_bytes());
                h.write(&high.to_le_bytes());
                h.write(&[*order]);
            }
        })
    }
}

/// Count ladders over elements and bonded element pairs.
fn fingerprint<'a>(
    tables: impl IntoIterator<Item = &'a ConnectionTable>,
    prefix: &str,
    out: &mut Vec<String>,
) {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for table in tables {
        let graph = table.heavy_graph();
        for element in &graph.elements {
            *counts.entry((*element).to_string()).or_default() += 1;
        }
        for (a, around) in graph.neighbours.iter().enumerate() {
            for &(b, order) in around.iter().filter(|&&(b, _)| a < b) {
                let mut pair = [graph.elements[a], graph.elements[b]];
                pair.sort_unstable();
                let token =
                    format!("{}{}{}", pair[0], bond_symbol(order), pair[1]);
                *counts.entry(token).or_default() += 1;
            }
        }
    }
    for (token, count) in counts {
        for i in 1..=count {
            out.push(format!("{prefix}{token}:{i}"));
        }
    }
}

/// The structure-bearing part of any supported text, once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Structure {
    Molecule(ConnectionTable),
    Reaction {
        reactants: Vec<ConnectionTable>,
        products: Vec<ConnectionTable>,
    },
}

impl Structure {
    fn kind(&self) -> StructureKind {
        match self {
            Self::Molecule(_) => StructureKind::Molecule,
            Self::Reaction { .. } => StructureKind::Reaction,
        }
    }

    fn encode(&self, text: &str) -> EncodedStructure {
        let mut fingerprint_tokens = Vec::new();
        let key = match self {
            Self::Molecule(table) => {
                fingerprint([table], "", &mut fingerprint_tokens);
                let hash = table.canonical_hash();
                stable_hash(|h| {
                    h.write(b"molecule");
                    h.write(&hash.to_le_bytes());
                })
            }
            Self::Reaction {
                reactants,
                products,
            } => {
                fingerprint(reactants, "r/", &mut fingerprint_tokens);
                fingerprint(products, "p/", &mut fingerprint_tokens);
                let side = |tables: &[ConnectionTable]| {
                    let mut hashes: Vec<u64> = tables
                        .iter()
                        .map(ConnectionTable::canonical_hash)
                        .collect();
                    hashes.sort_unstable();
                    hashes
                };
                let (reactants, products) = (side(reactants), side(products));
                stable_hash(|h| {
                    h.write(b"reaction");
                    for hash in &reactants {
                        h.write(&hash.to_le_bytes());
                    }
                    h.write(b">>");
                    for hash in &products {
                        h.write(&hash.to_le_bytes());
                    }
                })
            }
        };
        EncodedStructure {
            bytes: text.as_bytes().to_vec(),
            key: format!("{key:016x}"),
            fingerprint: fingerprint_tokens,
        }
    }
}

fn parse_error(message: impl Into<String>) -> Error {
    Error::Parse(message.into())
}

fn non_empty(line: &str) -> Option<String> {
    let trimmed = line.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn fixed_usize(line: &str, columns: Range<usize>) -> Result<usize> {
    let end = columns.end.min(line.len());
    line.get(columns.start..end)
        .map(str::trim)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| {
            parse_error(format!(
                "expected a number in columns {}..{} of '{line}'",
                columns.start, columns.end
            ))
        })
}

/// Parse a molfile, returning its title and connection table.
fn parse_molfile(text: &str) -> Result<(Option<String>, ConnectionTable)> {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() < 4 {
        return Err(parse_error("molfile header is truncated"));
    }
    let name = non_empty(lines[0]);
    let counts = lines[3];

    if counts.contains("V3000") {
        return Ok((name, parse_v3000(&lines[4..])?));
    }

    let atom_count = fixed_usize(counts, 0..3)?;
    let bond_count = fixed_usize(counts, 3..6)?;
    let atom_end = 4 + atom_count;
    let atom_lines = lines
        .get(4..atom_end)
        .ok_or_else(|| parse_error("atom block is truncated"))?;
    let bond_lines = lines
        .get(atom_end..atom_end + bond_count)
        .ok_or_else(|| parse_error("bond block is truncated"))?;

    let mut table = ConnectionTable::default();
    for line in atom_lines {
        let symbol = line
            .get(31..34.min(line.len()))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| line.split_whitespace().nth(3))
            .ok_or_else(|| parse_error(format!("bad atom line '{line}'")))?;
        table.atoms.push(symbol.to_string());
    }
    for line in bond_lines {
        let a = fixed_usize(line, 0..3)?;
        let b = fixed_usize(line, 3..6)?;
        let order = fixed_usize(line, 6..9)?;
        table.push_bond(a, b, order, line)?;
    }
    Ok((name, table))
}

impl ConnectionTable {
    /// Append a bond read from `line`, checking it against the atom block.
    fn push_bond(
        &mut self,
        a: usize,
        b: usize,
        order: usize,
        line: &str,
    ) -> Result<()> {
        let order = u8::try_from(order).map_err(|_| {
            parse_error(format!("bond order {order} is out of range: '{line}'"))
        })?;
        let atoms = 1..=self.atoms.len();
        if a == b || !atoms.contains(&a) || !atoms.contains(&b) {
            return Err(parse_error(format!(
                "bond {a}-{b} does not join two atoms in '{line}'"
            )));
        }
        self.bonds.push((a, b, order));
        Ok(())
    }
}

fn parse_v3000(lines: &[&str]) -> Result<ConnectionTable> {
    #[derive(PartialEq)]
    enum Block {
        None,
        Atom,
        Bond,
    }

    let mut table = ConnectionTable::default();
    let mut block = Block::None;
    for line in lines {
        let Some(body) = line.strip_prefix("M  V30 ") else {
            continue;
        };
        let fields: Vec<&str> = body.split_whitespace().collect();
        match fields.as_slice() {
            ["BEGIN", "ATOM", ..] => block = Block::Atom,
            ["BEGIN", "BOND", ..] => block = Block::Bond,
            ["END", ..] => block = Block::None,
            [_, symbol, ..] if block == Block::Atom => {
                table.atoms.push((*symbol).to_string());
            }
            [_, order, a, b, ..] if block == Block::Bond => {
                let parse = |s: &str| {
                    s.parse::<usize>().map_err(|_| {
                        parse_error(format!("bad V3000 bond line '{line}'"))
                    })
                };
                let (a, b, order) = (parse(*a)?, parse(*b)?, parse(*order)?);
                table.push_bond(a, b, order, line)?;
            }
            _ => {}
        }
    }
    Ok(table)
}

fn parse_rxnfile(text: &str) -> Result<(Option<String>, Structure)> {
    let lines: Vec<&str> = text.lines().collect();
    let header = lines.first().copied().unwrap_or_default();
    if !header.starts_with("$RXN") {
        return Err(parse_error("rxnfile must start with $RXN"));
    }
    if header.contains("V3000") {
        return Err(parse_error("V3000 rxnfiles are not supported"));
    }
    if lines.len() < 5 {
        return Err(parse_error("rxnfile header is truncated"));
    }
    let name = non_empty(lines[1]);
    let reactant_count = fixed_usize(lines[4], 0..3)?;
    let product_count = fixed_usize(lines[4], 3..6)?;

    let mut blocks: Vec<String> = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in &lines[5..] {
        if line.starts_with("$MOL") {
            if let Some(block) = current.take() {
                blocks.push(block.join("\n"));
            }
            current = Some(Vec::new());
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    if let Some(block) = current {
        blocks.push(block.join("\n"));
    }

    if blocks.len() != reactant_count + product_count {
        return Err(parse_error(format!(
            "rxnfile declares {} components but contains {}",
            reactant_count + product_count,
            blocks.len()
        )));
    }

    let mut tables = blocks
        .iter()
        .map(|block| parse_molfile(block).map(|(_, table)| table))
        .collect::<Result<Vec<_>>>()?;
    let products = tables.split_off(reactant_count);
    Ok((
        name,
        Structure::Reaction {
            reactants: tables,
            products,
        },
    ))
}

/// Order of a bond written without a symbol.
fn implicit_order(aromatic: &[bool], a: usize, b: usize) -> u8 {
    if aromatic[a - 1] && aromatic[b - 1] {
        AROMATIC
    } else {
        1
    }
}

/// Parse the connection table of a SMILES string.
///
/// Atoms are numbered from 1 in reading order. Branches, ring closures
/// (single digits and `%nn`) and `.` separated fragments are understood.
fn parse_smiles(smiles: &str) -> Result<ConnectionTable> {
    let fail = |what: &str| parse_error(format!("{what} in '{smiles}'"));
    let chars: Vec<char> = smiles.chars().collect();
    let mut table = ConnectionTable::default();
    let mut aromatic: Vec<bool> = Vec::new();
    let mut previous: Option<usize> = None;
    let mut branches: Vec<usize> = Vec::new();
    let mut pending: Option<u8> = None;
    let mut rings: BTreeMap<u32, (usize, Option<u8>)> = BTreeMap::new();

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        let atom = match c {
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .map(|offset| i + offset)
                    .ok_or_else(|| fail("unclosed bracket"))?;
                let atom = bracket_atom(&chars[i + 1..close], smiles)?;
                i = close;
                Some(atom)
            }
            'B' if next == Some('r') => {
                i += 1;
                Some(("Br".to_string(), false))
            }
            'C' if next == Some('l') => {
                i += 1;
                Some(("Cl".to_string(), false))
            }
            'B' | 'C' | 'N' | 'O' | 'P' | 'S' | 'F' | 'I' => {
                Some((c.to_string(), false))
            }
            'b' | 'c' | 'n' | 'o' | 'p' | 's' => {
                Some((c.to_ascii_uppercase().to_string(), true))
            }
            '-' | '/' | '\\' | '=' | '#' | ':' => {
                if pending.is_some() {
                    return Err(fail("two bond symbols in a row"));
                }
                pending = Some(match c {
                    '=' => 2,
                    '#' => 3,
                    ':' => AROMATIC,
                    _ => 1,
                });
                None
            }
            '(' => {
                let atom =
                    previous.ok_or_else(|| fail("branch before an atom"))?;
                branches.push(atom);
                None
            }
            ')' => {
                if pending.is_some() {
                    return Err(fail("bond symbol closes a branch"));
                }
                let atom =
                    branches.pop().ok_or_else(|| fail("unopened branch"))?;
                previous = Some(atom);
                None
            }
            '.' => {
                if pending.is_some() || !branches.is_empty() {
                    return Err(fail("misplaced '.'"));
                }
                previous = None;
                None
            }
            '%' | '0'..='9' => {
                let (number, width) = if c == '%' {
                    let digits: Vec<u32> = chars
                        .iter()
                        .skip(i + 1)
                        .take(2)
                        .map_while(|d| d.to_digit(10))
                        .collect();
                    let [tens, units] = digits.as_slice() else {
                        return Err(fail("'%' needs two digits"));
                    };
                    (tens * 10 + units, 2)
                } else {
                    (c.to_digit(10).unwrap_or_default(), 0)
                };
                i += width;
                let atom =
                    previous.ok_or_else(|| fail("ring bond before an atom"))?;
                match rings.remove(&number) {
                    Some((other, opened)) => {
                        if other == atom {
                            return Err(fail("ring closes on its own atom"));
                        }
                        let order = match (pending.take(), opened) {
                            (Some(a), Some(b)) if a != b => {
                                return Err(fail("ring bond orders disagree"));
                            }
                            (Some(order), _) | (None, Some(order)) => order,
                            (None, None) => {
                                implicit_order(&aromatic, other, atom)
                            }
                        };
                        table.bonds.push((other, atom, order));
                    }
                    None => {
                        rings.insert(number, (atom, pending.take()));
                    }
                }
                None
            }
            other => {
                return Err(fail(&format!("unexpected '{other}'")));
            }
        };

        if let Some((symbol, is_aromatic)) = atom {
            table.atoms.push(symbol);
            aromatic.push(is_aromatic);
            let index = table.atoms.len();
            if let Some(prev) = previous {
                let order = pending
                    .take()
                    .unwrap_or_else(|| implicit_order(&aromatic, prev, index));
                table.bonds.push((prev, index, order));
            } else if pending.is_some() {
                return Err(fail("bond symbol before the first atom"));
            }
            previous = Some(index);
        }
        i += 1;
    }

    if table.atoms.is_empty() {
        return Err(fail("no atoms"));
    }
    if pending.is_some() {
        return Err(fail("dangling bond symbol"));
    }
    if !branches.is_empty() {
        return Err(fail("unclosed branch"));
    }
    if let Some(number) = rings.keys().next() {
        return Err(fail(&format!("ring bond {number} is never closed")));
    }
    Ok(table)
}

/// Element of a bracket atom and whether it is written aromatic.
fn bracket_atom(inner: &[char], smiles: &str) -> Result<(String, bool)> {
    let mut letters = inner.iter().skip_while(|c| c.is_ascii_digit());
    let first = *letters
        .next()
        .filter(|c| c.is_ascii_alphabetic())
        .ok_or_else(|| {
            parse_error(format!("empty bracket atom in '{smiles}'"))
        })?;
    let second = letters.next().copied();

    let mut symbol = first.to_ascii_uppercase().to_string();
    match second {
        Some(s) if first.is_ascii_uppercase() && s.is_ascii_lowercase() => {
            symbol.push(s);
        }
        // Aromatic selenium and arsenic.
        Some('e') if first == 's' => symbol.push('e'),
        Some('s') if first == 'a' => symbol.push('s'),
        _ => {}
    }
    Ok((symbol, first.is_ascii_lowercase()))
}

fn parse_reaction_smiles(smiles: &str) -> Result<Structure> {
    let parts: Vec<&str> = smiles.split('>').collect();
    let [reactants, _agents, products] = parts.as_slice() else {
        return Err(parse_error(format!(
            "reaction SMILES needs exactly two '>' in '{smiles}'"
        )));
    };
    let side = |part: &str| {
        part.split('.')
            .filter(|s| !s.is_empty())
            .map(parse_smiles)
            .collect::<Result<Vec<_>>>()
    };
    Ok(Structure::Reaction {
        reactants: side(reactants)?,
        products: side(products)?,
    })
}

fn parse_smiles_structure(smiles: &str) -> Result<Structure> {
    if smiles.contains('>') {
        parse_reaction_smiles(smiles)
    } else {
        Ok(Structure::Molecule(parse_smiles(smiles)?))
    }
}

/// Parse any supported single-structure text, guessing the format.
fn parse_text(text: &str) -> Result<(Option<String>, Structure)> {
    if text.trim_start().starts_with("$RXN") {
        parse_rxnfile(text.trim_start())
    } else if text.lines().count() >= 4 {
        let (name, table) = parse_molfile(text)?;
        Ok((name, Structure::Molecule(table)))
    } else {
        let mut parts = text.trim().splitn(2, char::is_whitespace);
        let smiles = parts.next().unwrap_or_default();
        let name = parts.next().and_then(non_empty);
        Ok((name, parse_smiles_structure(smiles)?))
    }
}

/// Split SD file content into (molfile text, data items) per record.
fn split_sdf(text: &str) -> Vec<(String, Vec<(String, Vec<u8>)>)> {
    let mut records = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim_end() == SDF_DELIMITER {
            if current.iter().any(|l| !l.trim().is_empty()) {
                records.push(split_sdf_record(&current));
            }
            current.clear();
        } else {
            current.push(line);
        }
    }
    if current.iter().any(|l| !l.trim().is_empty()) {
        records.push(split_sdf_record(&current));
    }
    records
}

fn split_sdf_record(lines: &[&str]) -> (String, Vec<(String, Vec<u8>)>) {
    let Some(end) = lines.iter().position(|l| l.starts_with(MOL_END)) else {
        return (lines.join("\n"), Vec::new());
    };
    let molfile = lines[..=end].join("\n");

    let mut properties = Vec::new();
    let mut rest = lines[end + 1..].iter().peekable();
    while let Some(line) = rest.next() {
        if !line.starts_with('>') {
            continue;
        }
        let Some(name) = line
            .split_once('<')
            .and_then(|(_, tail)| tail.split_once('>'))
            .map(|(name, _)| name.to_string())
        else {
            continue;
        };
        let mut value: Vec<&str> = Vec::new();
        while let Some(next) = rest.peek() {
            if next.trim().is_empty() {
                rest.next();
                break;
            }
            if next.starts_with('>') {
                break;
            }
            value.push(next);
            rest.next();
        }
        properties.push((name, value.join("\n").into_bytes()));
    }
    (molfile, properties)
}

impl Toolkit for MdlToolkit {
    fn format_of(&self, path: &Path) -> Option<FileFormat> {
        FileFormat::from_path(path)
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<ParsedStructure>> {
        let format = self
            .format_of(path)
            .ok_or_else(|| Error::UnknownFileFormat(path.to_path_buf()))?;
        let text = std::fs::read_to_string(path)?;
        let with_path = |err: Error| match err {
            Error::Parse(msg) => {
                Error::Parse(format!("{}: {msg}", path.display()))
            }
            other => other,
        };

        let structure = |kind,
                         name,
                         text: String,
                         properties,
                         ordinal| ParsedStructure {
            kind,
            name,
            text,
            properties,
            source: Some(path.to_path_buf()),
            ordinal,
        };

        match format {
            FileFormat::Molfile => {
                let (name, _) = parse_molfile(&text).map_err(with_path)?;
                Ok(vec![structure(
                    StructureKind::Molecule,
                    name,
                    text,
                    Vec::new(),
                    0,
                )])
            }
            FileFormat::Rxnfile => {
                let (name, _) = parse_rxnfile(&text).map_err(with_path)?;
                Ok(vec![structure(
                    StructureKind::Reaction,
                    name,
                    text,
                    Vec::new(),
                    0,
                )])
            }
            FileFormat::Sdf => split_sdf(&text)
                .into_iter()
                .enumerate()
                .map(|(ordinal, (molfile, properties))| {
                    let (name, _) = parse_molfile(&molfile).map_err(with_path)?;
                    Ok(structure(
                        StructureKind::Molecule,
                        name,
                        molfile,
                        properties,
                        ordinal,
                    ))
                })
                .collect(),
            FileFormat::Smiles => text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .enumerate()
                .map(|(ordinal, line)| {
                    let mut parts = line.splitn(2, char::is_whitespace);
                    let smiles = parts.next().unwrap_or_default();
                    let name = parts.next().and_then(non_empty);
                    let parsed =
                        parse_smiles_structure(smiles).map_err(with_path)?;
                    Ok(structure(
                        parsed.kind(),
                        name,
                        smiles.to_string(),
                        Vec::new(),
                        ordinal,
                    ))
                })
                .collect(),
        }
    }

    fn parse_str(
        &self,
        text: &str,
        kind: StructureKind,
    ) -> Result<ParsedStructure> {
        let (name, structure) = parse_text(text)?;
        if structure.kind() != kind {
            return Err(parse_error(format!(
                "expected a {kind}, found a {}",
                structure.kind()
            )));
        }
        Ok(ParsedStructure {
            kind,
            name,
            text: text.to_string(),
            properties: Vec::new(),
            source: None,
            ordinal: 0,
        })
    }

    fn encode(&self, structure: &ParsedStructure) -> Result<EncodedStructure> {
        let (_, parsed) = parse_text(&structure.text)?;
        if parsed.kind() != structure.kind {
            return Err(parse_error(format!(
                "structure text is a {}, not a {}",
                parsed.kind(),
                structure.kind
            )));
        }
        Ok(parsed.encode(&structure.text))
    }

    fn decode(
        &self,
        kind: StructureKind,
        bytes: &[u8],
    ) -> Result<ParsedStructure> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| parse_error(format!("encoded structure: {e}")))?;
        self.parse_str(text, kind)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    pub const ETHANOL_MOL: &str = "ethanol
  chemdex

  3  2  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    2.5981   -0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  2  3  1  0
M  END
";

    pub const ACETIC_ACID_MOL: &str = "acetic acid
  chemdex

  4  3  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    2.5981   -0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    2.2500    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  2  3  1  0
  2  4  2  0
M  END
";

    pub const TWO_RECORD_SDF: &str = "ethanol
  chemdex

  3  2  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    2.5981   -0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  2  3  1  0
M  END
> <CAS>
64-17-5

> <SUPPLIER>
Acme
Chemicals

$$$$
methane
  chemdex

  1  0  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
M  END
> <CAS>
74-82-8

$$$$
";

    pub const ESTERIFICATION_RXN: &str = "$RXN
esterification
  chemdex

  2  1
$MOL
ethanol
  chemdex

  3  2  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    2.5981   -0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  2  3  1  0
M  END
$MOL
acetic acid
  chemdex

  4  3  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    2.5981   -0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    2.2500    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  2  3  1  0
  2  4  2  0
M  END
$MOL
ethyl acetate
  chemdex

  6  5  0  0  0  0  0  0  0  0999 V2000
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    2.5981   -0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    2.2500    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
    3.8971    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    5.1962   -0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
  1  2  1  0
  2  3  1  0
  2  4  2  0
  3  5  1  0
  5  6  1  0
M  END
";
}

#[cfg(test)]
mod tests {
    use super::{fixtures::*, *};

    fn write(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn parses_v2000_molfile() {
        let (name, table) = parse_molfile(ETHANOL_MOL).unwrap();
        assert_eq!(name.as_deref(), Some("ethanol"));
        assert_eq!(table.atoms, vec!["C", "C", "O"]);
        assert_eq!(table.bonds, vec![(1, 2, 1), (2, 3, 1)]);
    }

    #[test]
    fn parses_v3000_molfile() {
        let text = "water
  chemdex

  0  0  0     0  0            999 V3000
M  V30 BEGIN CTAB
M  V30 COUNTS 3 2 0 0 0
M  V30 BEGIN ATOM
M  V30 1 O 0 0 0 0
M  V30 2 H 1 0 0 0
M  V30 3 H -1 0 0 0
M  V30 END ATOM
M  V30 BEGIN BOND
M  V30 1 1 1 2
M  V30 2 1 1 3
M  V30 END BOND
M  V30 END CTAB
M  END
";
        let (name, table) = parse_molfile(text).unwrap();
        assert_eq!(name.as_deref(), Some("water"));
        assert_eq!(table.atoms, vec!["O", "H", "H"]);
        assert_eq!(table.bonds, vec![(1, 2, 1), (1, 3, 1)]);
    }

    #[test]
    fn truncated_molfile_is_an_error() {
        let err = parse_molfile("x\n\n\n  5  4\n").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn key_ignores_coordinates_and_title() {
        let moved = ETHANOL_MOL
            .replace("ethanol", "EtOH")
            .replace("1.2990", "9.9999");
        let toolkit = MdlToolkit;
        let a = toolkit
            .encode(
                &toolkit
                    .parse_str(ETHANOL_MOL, StructureKind::Molecule)
                    .unwrap(),
            )
            .unwrap();
        let moved = toolkit
            .parse_str(&moved, StructureKind::Molecule)
            .unwrap();
        let b = toolkit.encode(&moved).unwrap();
        assert_eq!(a.key, b.key);
        assert_ne!(a.bytes, b.bytes);
    }

    #[test]
    fn fingerprint_is_monotone_under_substructure() {
        let toolkit = MdlToolkit;
        let ethanol = toolkit
            .encode(
                &toolkit
                    .parse_str(ETHANOL_MOL, StructureKind::Molecule)
                    .unwrap(),
            )
            .unwrap();
        let acid = toolkit
            .encode(
                &toolkit
                    .parse_str(ACETIC_ACID_MOL, StructureKind::Molecule)
                    .unwrap(),
            )
            .unwrap();
        for token in &ethanol.fingerprint {
            assert!(acid.fingerprint.contains(token), "missing {token}");
        }
        assert!(acid.fingerprint.contains(&"C=O:1".to_string()));
        assert!(!ethanol.fingerprint.contains(&"C=O:1".to_string()));
        assert!(ethanol.fingerprint.contains(&"C-O:1".to_string()));
    }

    fn key(text: &str) -> String {
        let toolkit = MdlToolkit;
        let parsed = toolkit.parse_str(text, StructureKind::Molecule).unwrap();
        toolkit.encode(&parsed).unwrap().key
    }

    #[test]
    fn key_ignores_atom_order_and_format() {
        assert_eq!(key(ETHANOL_MOL), key("CCO"));
        assert_eq!(key("CCO"), key("OCC"));
        assert_eq!(key("CCO"), key("C(O)C"));
        assert_eq!(key(ACETIC_ACID_MOL), key("CC(=O)O"));
        assert_eq!(key("CC(=O)O"), key("OC(C)=O"));

        let renumbered = "ethanol
  chemdex

  3  2  0  0  0  0  0  0  0  0999 V2000
    2.5981   -0.0000    0.0000 O   0  0  0  0  0  0  0  0  0  0  0  0
    0.0000    0.0000    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
    1.2990    0.7500    0.0000 C   0  0  0  0  0  0  0  0  0  0  0  0
  3  1  1  0
  2  3  1  0
M  END
";
        assert_eq!(key(renumbered), key(ETHANOL_MOL));
    }

    #[test]
    fn key_tells_isomers_apart() {
        assert_ne!(key("CCO"), key("COC"));
        assert_ne!(key("CC=O"), key("CCO"));
        assert_ne!(key("C1CC1"), key("CCC"));
        assert_ne!(key("CCCC"), key("CC(C)C"));
    }

    #[test]
    fn key_drops_explicit_hydrogens() {
        assert_eq!(key("[H]OC"), key("CO"));
        assert_eq!(key("[H][H]"), key("[H]"));
    }

    #[test]
    fn key_is_stable_across_builds() {
        assert_eq!(key("C"), "cb1384d614e2a0aa");
    }

    #[test]
    fn reaction_key_ignores_component_order() {
        let encode = |smiles: &str| {
            let parsed = MdlToolkit
                .parse_str(smiles, StructureKind::Reaction)
                .unwrap();
            MdlToolkit.encode(&parsed).unwrap().key
        };
        assert_eq!(
            encode("CCO.CC(=O)O>>CCOC(C)=O"),
            encode("OC(C)=O.OCC>>O=C(C)OCC")
        );
        assert_ne!(
            encode("CCO.CC(=O)O>>CCOC(C)=O"),
            encode("CCOC(C)=O>>CCO.CC(=O)O")
        );
    }

    #[test]
    fn out_of_range_bond_order_is_a_parse_error() {
        let wide = ETHANOL_MOL.replace("  2  3  1  0", "  2  3300  0");
        let err = parse_molfile(&wide).unwrap_err();
        assert!(matches!(err, Error::Parse(msg) if msg.contains("300")));

        let dangling = ETHANOL_MOL.replace("  2  3  1  0", "  2  9  1  0");
        assert!(matches!(parse_molfile(&dangling), Err(Error::Parse(_))));
    }

    #[test]
    fn smiles_atoms_and_bonds() {
        let table = parse_smiles("OC(=O)c1ccccc1Cl").unwrap();
        assert_eq!(table.atoms.iter().filter(|a| *a == "C").count(), 7);
        assert_eq!(table.atoms.iter().filter(|a| *a == "O").count(), 2);
        assert!(table.atoms.contains(&"Cl".to_string()));
        assert_eq!(table.bonds.len(), 10);
        let orders = |order| {
            table.bonds.iter().filter(|&&(_, _, o)| o == order).count()
        };
        assert_eq!(orders(2), 1);
        assert_eq!(orders(AROMATIC), 6);
        assert!(table.bonds.contains(&(4, 9, AROMATIC)));

        let bracket = parse_smiles("[Na+].[13CH3][se]1cccc1").unwrap();
        assert_eq!(bracket.atoms[0], "Na");
        assert_eq!(bracket.atoms[1], "C");
        assert_eq!(bracket.atoms[2], "Se");
        assert_eq!(bracket.bonds[0], (2, 3, 1));
        assert_eq!(bracket.bonds[1], (3, 4, AROMATIC));
    }

    #[test]
    fn smiles_branches_and_ring_closures() {
        let table = parse_smiles("CC(C)(C)O").unwrap();
        assert_eq!(
            table.bonds,
            vec![(1, 2, 1), (2, 3, 1), (2, 4, 1), (2, 5, 1)]
        );

        let table = parse_smiles("C%12CC=C%12").unwrap();
        assert_eq!(
            table.bonds,
            vec![(1, 2, 1), (2, 3, 1), (3, 4, 2), (1, 4, 1)]
        );

        let table = parse_smiles("C=1CC1").unwrap();
        assert!(table.bonds.contains(&(1, 3, 2)));
    }

    #[test]
    fn smiles_rejects_garbage() {
        assert!(parse_smiles("Xx").is_err());
        assert!(parse_smiles("[C").is_err());
        assert!(parse_smiles("()").is_err());
        assert!(parse_smiles("C1CC").is_err());
        assert!(parse_smiles("C(C").is_err());
        assert!(parse_smiles("CC)").is_err());
        assert!(parse_smiles("CC=").is_err());
        assert!(parse_smiles("C%1C").is_err());
        assert!(parse_smiles("C=1CC#1").is_err());
    }

    #[test]
    fn reaction_smiles_sides() {
        let parsed = parse_smiles_structure("CCO.CC(=O)O>>CCOC(C)=O").unwrap();
        let Structure::Reaction {
            reactants,
            products,
        } = parsed
        else {
            panic!("expected a reaction");
        };
        assert_eq!(reactants.len(), 2);
        assert_eq!(products.len(), 1);
        assert!(parse_reaction_smiles("CC>O").is_err());
    }

    #[test]
    fn parses_sdf_records_and_properties() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), "lib.sdf", TWO_RECORD_SDF);

        let parsed = MdlToolkit.parse_file(&path).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name.as_deref(), Some("ethanol"));
        assert_eq!(parsed[0].property_text("CAS"), Some("64-17-5"));
        assert_eq!(
            parsed[0].property_text("SUPPLIER"),
            Some("Acme\nChemicals")
        );
        assert_eq!(parsed[1].name.as_deref(), Some("methane"));
        assert_eq!(parsed[1].ordinal, 1);
        assert!(parsed[1].text.ends_with(MOL_END));
    }

    #[test]
    fn parses_rxnfile() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), "ester.rxn", ESTERIFICATION_RXN);

        let parsed = MdlToolkit.parse_file(&path).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, StructureKind::Reaction);
        assert_eq!(parsed[0].name.as_deref(), Some("esterification"));

        let encoded = MdlToolkit.encode(&parsed[0]).unwrap();
        assert!(encoded.fingerprint.contains(&"r/O:3".to_string()));
        assert!(encoded.fingerprint.contains(&"p/C:4".to_string()));
    }

    #[test]
    fn smiles_file_mixes_molecules_and_reactions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(
            tmp.path(),
            "set.smi",
            "# comment\nCCO ethanol\n\nCCO.CC(=O)O>>CCOC(C)=O ester\n",
        );

        let parsed = MdlToolkit.parse_file(&path).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].kind, StructureKind::Molecule);
        assert_eq!(parsed[0].name.as_deref(), Some("ethanol"));
        assert_eq!(parsed[0].text, "CCO");
        assert_eq!(parsed[1].kind, StructureKind::Reaction);
    }

    #[test]
    fn unknown_extension_is_unknown_format() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write(tmp.path(), "readme.txt", "hello");
        let err = MdlToolkit.parse_file(&path).unwrap_err();
        assert!(matches!(err, Error::UnknownFileFormat(p) if p == path));
    }

    #[test]
    fn decode_checks_kind() {
        let bytes = ESTERIFICATION_RXN.as_bytes();
        assert!(MdlToolkit.decode(StructureKind::Reaction, bytes).is_ok());
        assert!(MdlToolkit.decode(StructureKind::Molecule, bytes).is_err());
    }
}
